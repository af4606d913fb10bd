//! Reconnect schedules produced by the failover transport.

use std::time::Duration;

use stomp_core::FailoverTransport;

fn hosts_and_delays(
    transport: &mut FailoverTransport,
    count: usize,
) -> Vec<(String, u64)> {
    transport
        .take(count)
        .map(|(broker, delay)| (broker.host, delay.as_millis() as u64))
        .collect()
}

#[test]
fn exponential_schedule_matches_the_documented_sequence() {
    let mut transport = FailoverTransport::with_seed(
        "failover:(tcp://h1:1,tcp://h2:2)?randomize=false&initialReconnectDelay=100\
         &backOffMultiplier=2&useExponentialBackOff=true&maxReconnectDelay=500\
         &maxReconnectAttempts=5",
        0,
    )
    .unwrap();

    assert_eq!(
        hosts_and_delays(&mut transport, 16),
        vec![
            ("h1".to_string(), 0),
            ("h2".to_string(), 100),
            ("h1".to_string(), 200),
            ("h2".to_string(), 400),
            ("h1".to_string(), 500),
        ]
    );
    // spent; the iterator stays exhausted
    assert!(transport.next().is_none());
}

#[test]
fn constant_delay_without_exponential_back_off() {
    let mut transport = FailoverTransport::with_seed(
        "failover:tcp://h:1?randomize=false&useExponentialBackOff=false\
         &initialReconnectDelay=250&maxReconnectAttempts=4",
        0,
    )
    .unwrap();
    let delays: Vec<u64> = transport
        .by_ref()
        .map(|(_, d)| d.as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![0, 250, 250, 250]);
}

#[test]
fn default_schedule_is_infinite() {
    let mut transport =
        FailoverTransport::with_seed("failover:tcp://h:1?randomize=false", 0).unwrap();
    assert_eq!(transport.by_ref().take(1000).count(), 1000);
    assert!(transport.next().is_some());
}

#[test]
fn randomize_false_keeps_the_uri_order() {
    let mut transport = FailoverTransport::with_seed(
        "failover:(tcp://a:1,tcp://b:1,tcp://c:1)?randomize=false",
        99,
    )
    .unwrap();
    let hosts: Vec<String> = transport.by_ref().take(6).map(|(b, _)| b.host).collect();
    assert_eq!(hosts, vec!["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn shuffled_schedules_are_deterministic_per_seed() {
    let uri = "failover:(tcp://a:1,tcp://b:1,tcp://c:1,tcp://d:1)?randomize=true";
    let prefix = |seed: u64| -> Vec<String> {
        FailoverTransport::with_seed(uri, seed)
            .unwrap()
            .take(8)
            .map(|(b, _)| b.host)
            .collect()
    };
    // the prefix is a pure function of the seed
    assert_eq!(prefix(7), prefix(7));

    // shuffling permutes the broker list exactly once: the first pass is a
    // permutation of the uri hosts and the second pass repeats it
    let hosts = prefix(7);
    let mut first_pass = hosts[..4].to_vec();
    first_pass.sort();
    assert_eq!(first_pass, vec!["a", "b", "c", "d"]);
    assert_eq!(hosts[..4], hosts[4..]);
}

#[test]
fn priority_backup_pins_the_primary_and_cycles_the_rest() {
    let mut transport = FailoverTransport::with_seed(
        "failover:(tcp://p:1,tcp://s1:1,tcp://s2:1)?randomize=false&priorityBackup=true",
        0,
    )
    .unwrap();
    let hosts: Vec<String> = transport.by_ref().take(9).map(|(b, _)| b.host).collect();
    assert_eq!(
        hosts,
        vec!["p", "s1", "s2", "p", "s2", "s1", "p", "s1", "s2"]
    );
}

#[test]
fn startup_limit_applies_until_the_first_success() {
    let uri = "failover:tcp://h:1?randomize=false&maxReconnectAttempts=5\
               &startupMaxReconnectAttempts=2";
    let mut transport = FailoverTransport::with_seed(uri, 0).unwrap();
    assert_eq!(transport.by_ref().count(), 2);

    // once connected, the counter resets and the regular limit governs
    transport.connected();
    assert_eq!(transport.by_ref().count(), 5);
}

#[test]
fn connected_resets_the_back_off() {
    let mut transport = FailoverTransport::with_seed(
        "failover:tcp://h:1?randomize=false&initialReconnectDelay=100&backOffMultiplier=2",
        0,
    )
    .unwrap();
    let first: Vec<Duration> = transport.by_ref().take(3).map(|(_, d)| d).collect();
    assert_eq!(
        first,
        vec![
            Duration::from_millis(0),
            Duration::from_millis(100),
            Duration::from_millis(200)
        ]
    );
    transport.connected();
    assert_eq!(transport.next().unwrap().1, Duration::ZERO);
}

#[test]
fn jitter_stays_within_bounds_and_is_seed_deterministic() {
    let uri = "failover:tcp://h:1?randomize=false&useExponentialBackOff=false\
               &initialReconnectDelay=1000&reconnectDelayJitter=50&maxReconnectAttempts=20";
    let delays = |seed: u64| -> Vec<u64> {
        FailoverTransport::with_seed(uri, seed)
            .unwrap()
            .map(|(_, d)| d.as_millis() as u64)
            .collect()
    };

    let first = delays(42);
    assert_eq!(first, delays(42));
    assert_eq!(first[0], 0);
    for delay in &first[1..] {
        assert!((950..=1050).contains(delay), "delay {delay} out of bounds");
    }
}

#[test]
fn delay_is_capped_at_the_maximum() {
    let mut transport = FailoverTransport::with_seed(
        "failover:tcp://h:1?randomize=false&initialReconnectDelay=100\
         &backOffMultiplier=10&maxReconnectDelay=900&maxReconnectAttempts=6",
        0,
    )
    .unwrap();
    let delays: Vec<u64> = transport
        .by_ref()
        .map(|(_, d)| d.as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![0, 100, 900, 900, 900, 900]);
}

//! Broker failover: URI parsing and the reconnect schedule.
//!
//! A failover URI names an ordered list of candidate brokers plus policy
//! options, in the form
//! `failover:(tcp://h1:p1,ssl://h2:p2)?initialReconnectDelay=100&...` or
//! the short form `failover:tcp://h:p`.
//!
//! [`FailoverTransport`] turns the parsed configuration into an iterator
//! of `(broker, delay)` pairs: which broker to try next and how long to
//! wait before dialing. The iterator is infinite when
//! `maxReconnectAttempts` is `-1`; otherwise it ends once the attempts are
//! spent, and callers report [`StompError::NoMoreBrokers`]. The RNG
//! driving shuffling and jitter is injectable, so a fixed seed makes the
//! whole schedule deterministic.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{Result, StompError};

/// How to reach a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Ssl,
}

impl BrokerScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            BrokerScheme::Tcp => "tcp",
            BrokerScheme::Ssl => "ssl",
        }
    }
}

/// A candidate broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for Broker {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| StompError::MalformedUri(format!("missing scheme in {s:?}")))?;
        let scheme = match scheme {
            "tcp" => BrokerScheme::Tcp,
            "ssl" => BrokerScheme::Ssl,
            other => {
                return Err(StompError::MalformedUri(format!(
                    "unsupported scheme {other:?} in {s:?}"
                )));
            }
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| StompError::MalformedUri(format!("missing port in {s:?}")))?;
        if host.is_empty() {
            return Err(StompError::MalformedUri(format!("missing host in {s:?}")));
        }
        let port = port
            .parse()
            .map_err(|_| StompError::MalformedUri(format!("invalid port in {s:?}")))?;
        Ok(Broker {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

/// The parsed failover policy.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    pub brokers: Vec<Broker>,
    /// Shuffle the broker list once before the first attempt.
    pub randomize: bool,
    /// Pin the first broker and cycle the remaining ones after each
    /// completed pass.
    pub priority_backup: bool,
    /// Base reconnect delay in milliseconds.
    pub initial_reconnect_delay: u64,
    /// Ceiling for the backed-off delay in milliseconds.
    pub max_reconnect_delay: u64,
    pub back_off_multiplier: f64,
    pub use_exponential_back_off: bool,
    /// Total attempts before giving up; -1 means never.
    pub max_reconnect_attempts: i32,
    /// Attempt limit before the first successful connect; -1 inherits
    /// `max_reconnect_attempts`.
    pub startup_max_reconnect_attempts: i32,
    /// Uniform jitter applied to every non-zero delay, in milliseconds.
    pub reconnect_delay_jitter: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        FailoverConfig {
            brokers: Vec::new(),
            randomize: true,
            priority_backup: false,
            initial_reconnect_delay: 10,
            max_reconnect_delay: 30_000,
            back_off_multiplier: 2.0,
            use_exponential_back_off: true,
            max_reconnect_attempts: -1,
            startup_max_reconnect_attempts: -1,
            reconnect_delay_jitter: 0,
        }
    }
}

impl FailoverConfig {
    fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| {
                StompError::MalformedUri(format!("invalid value for {key}: {value:?}"))
            })
        }
        match key {
            "randomize" => self.randomize = parse(key, value)?,
            "priorityBackup" => self.priority_backup = parse(key, value)?,
            "initialReconnectDelay" => self.initial_reconnect_delay = parse(key, value)?,
            "maxReconnectDelay" => self.max_reconnect_delay = parse(key, value)?,
            "backOffMultiplier" => self.back_off_multiplier = parse(key, value)?,
            "useExponentialBackOff" => self.use_exponential_back_off = parse(key, value)?,
            "maxReconnectAttempts" => self.max_reconnect_attempts = parse(key, value)?,
            "startupMaxReconnectAttempts" => {
                self.startup_max_reconnect_attempts = parse(key, value)?
            }
            "reconnectDelayJitter" => self.reconnect_delay_jitter = parse(key, value)?,
            other => {
                return Err(StompError::MalformedUri(format!(
                    "unknown option: {other:?}"
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for FailoverConfig {
    type Err = StompError;

    fn from_str(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix("failover:").ok_or_else(|| {
            StompError::MalformedUri(format!("expected a failover: uri, got {uri:?}"))
        })?;

        let (broker_list, query) = if let Some(rest) = rest.strip_prefix('(') {
            let (list, tail) = rest.split_once(')').ok_or_else(|| {
                StompError::MalformedUri(format!("unterminated broker list in {uri:?}"))
            })?;
            let query = match tail {
                "" => None,
                tail => Some(tail.strip_prefix('?').ok_or_else(|| {
                    StompError::MalformedUri(format!(
                        "unexpected characters after broker list: {tail:?}"
                    ))
                })?),
            };
            (list, query)
        } else {
            match rest.split_once('?') {
                Some((list, query)) => (list, Some(query)),
                None => (rest, None),
            }
        };

        let brokers = broker_list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Broker::from_str)
            .collect::<Result<Vec<_>>>()?;
        if brokers.is_empty() {
            return Err(StompError::MalformedUri(format!(
                "no brokers in {uri:?}"
            )));
        }

        let mut config = FailoverConfig {
            brokers,
            ..Default::default()
        };
        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StompError::MalformedUri(format!("malformed option: {pair:?}"))
            })?;
            config.set_option(key, value)?;
        }
        Ok(config)
    }
}

/// The reconnect schedule: an iterator of `(broker, delay)` pairs.
///
/// The first attempt of each cycle carries no delay; later attempts back
/// off per the configuration. [`connected`](FailoverTransport::connected)
/// must be called after a successful handshake so the attempt counter
/// resets and the startup limit stops applying.
#[derive(Debug)]
pub struct FailoverTransport<R = StdRng> {
    config: FailoverConfig,
    order: Vec<Broker>,
    rng: R,
    attempt: u32,
    connected_once: bool,
}

impl FailoverTransport<StdRng> {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(Self::from_config(uri.parse()?, StdRng::from_entropy()))
    }

    /// A transport whose shuffle and jitter are fully determined by
    /// `seed`.
    pub fn with_seed(uri: &str, seed: u64) -> Result<Self> {
        Ok(Self::from_config(uri.parse()?, StdRng::seed_from_u64(seed)))
    }
}

impl<R: Rng> FailoverTransport<R> {
    /// Build a schedule from an already-parsed configuration and an
    /// injected RNG.
    pub fn from_config(config: FailoverConfig, mut rng: R) -> Self {
        let mut order = config.brokers.clone();
        if config.randomize {
            order.shuffle(&mut rng);
        }
        FailoverTransport {
            config,
            order,
            rng,
            attempt: 0,
            connected_once: false,
        }
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Report a successful connection: the attempt counter restarts and
    /// the regular attempt limit takes over from the startup limit.
    pub fn connected(&mut self) {
        self.connected_once = true;
        self.attempt = 0;
    }

    fn attempt_limit(&self) -> i32 {
        if !self.connected_once && self.config.startup_max_reconnect_attempts >= 0 {
            self.config.startup_max_reconnect_attempts
        } else {
            self.config.max_reconnect_attempts
        }
    }

    fn delay_ms(&mut self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let base = if self.config.use_exponential_back_off {
            let delay = self.config.initial_reconnect_delay as f64
                * self.config.back_off_multiplier.powi(attempt as i32 - 1);
            delay.min(self.config.max_reconnect_delay as f64) as u64
        } else {
            self.config.initial_reconnect_delay
        };
        let jitter = self.config.reconnect_delay_jitter;
        if jitter == 0 {
            return base;
        }
        base.saturating_add_signed(self.rng.gen_range(-(jitter as i64)..=jitter as i64))
    }
}

impl<R: Rng> Iterator for FailoverTransport<R> {
    type Item = (Broker, Duration);

    fn next(&mut self) -> Option<Self::Item> {
        let limit = self.attempt_limit();
        if limit >= 0 && self.attempt >= limit as u32 {
            return None;
        }
        let index = self.attempt as usize % self.order.len();
        if self.config.priority_backup && index == 0 && self.attempt > 0 && self.order.len() > 2 {
            // new pass: the primary stays in front, the backups cycle
            self.order[1..].rotate_left(1);
        }
        let delay = self.delay_ms(self.attempt);
        let broker = self.order[index].clone();
        self.attempt += 1;
        Some((broker, Duration::from_millis(delay)))
    }
}

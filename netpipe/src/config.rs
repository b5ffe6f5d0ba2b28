use std::time::Duration;

/// Tunables for a transport. Defaults to a 1500-byte MTU and a 100ms worker poll interval.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Maximum size of a single datagram, header included. Effective payload capacity is
    /// `mtu - 4`.
    pub mtu: usize,
    /// How long the network worker blocks in a single poll cycle waiting for readiness.
    pub worker_poll_interval: Duration,
    /// Number of buffers to pre-allocate in the pool at transport construction time.
    pub initial_pool_capacity: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        PipeConfig {
            mtu: 1500,
            worker_poll_interval: Duration::from_millis(100),
            initial_pool_capacity: 0,
        }
    }
}

/// Parsed form of the opaque `hints` string accepted by `pipe_create`/`pipe_open`/`pipe_put`.
///
/// `hints` is reserved for forward-compatible tuning and is never required; this crate parses
/// a `key=value;key=value` convention so future tuning can be threaded through without changing
/// the public signature. Unknown keys are ignored.
#[derive(Debug, Clone, Default)]
pub struct Hints {
    entries: Vec<(String, String)>,
}

impl Hints {
    pub fn parse(raw: &str) -> Hints {
        let entries = raw
            .split(';')
            .filter_map(|pair| {
                let mut parts = pair.splitn(2, '=');
                let key = parts.next()?.trim();
                let value = parts.next()?.trim();
                if key.is_empty() {
                    None
                } else {
                    Some((key.to_string(), value.to_string()))
                }
            })
            .collect();
        Hints { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

//! Two-key input sequences ("g" then "s") tracked as explicit state with an
//! expiry instead of a global "waiting" flag.

pub const DEFAULT_CHORD_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChord {
    pub prefix: char,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChordOutcome {
    /// The key opened a sequence; wait for the next one.
    Pending,
    /// The key completed a sequence started by `prefix`.
    Complete { prefix: char, key: char },
    /// The key stands on its own.
    Single(char),
}

#[derive(Debug, Clone)]
pub struct ChordState {
    prefixes: Vec<char>,
    timeout_ms: u64,
    pending: Option<PendingChord>,
}

impl ChordState {
    pub fn new(prefixes: impl IntoIterator<Item = char>, timeout_ms: u64) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
            timeout_ms,
            pending: None,
        }
    }

    pub fn press(&mut self, key: char, now_ms: u64) -> ChordOutcome {
        if let Some(pending) = self.pending.take()
            && now_ms <= pending.expires_at_ms
        {
            return ChordOutcome::Complete {
                prefix: pending.prefix,
                key,
            };
        }

        if self.prefixes.contains(&key) {
            self.pending = Some(PendingChord {
                prefix: key,
                expires_at_ms: now_ms.saturating_add(self.timeout_ms),
            });
            ChordOutcome::Pending
        } else {
            ChordOutcome::Single(key)
        }
    }

    pub fn is_pending(&self, now_ms: u64) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| now_ms <= p.expires_at_ms)
    }

    pub fn pending(&self) -> Option<&PendingChord> {
        self.pending.as_ref()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

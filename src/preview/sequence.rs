/// Sequence numbers of one preview channel.
///
/// Numbers are issued by the engine and only grow, so a channel that is
/// dropped and later recreated never confuses an old request with a new
/// one. After the debounce quantum a request is dispatched only if it is
/// still the latest requested, and its result is applied only if it is
/// still the latest dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceGate {
    requested: u64,
    dispatched: u64,
}

impl SequenceGate {
    /// Record `sequence` as the newest request. Older numbers are ignored.
    pub fn request(&mut self, sequence: u64) {
        self.requested = self.requested.max(sequence);
    }

    /// Mark `sequence` as dispatched if no newer request arrived.
    pub fn try_dispatch(&mut self, sequence: u64) -> bool {
        if sequence == self.requested {
            self.dispatched = sequence;
            true
        } else {
            false
        }
    }

    /// Whether a result for `sequence` may be applied.
    pub fn accepts(&self, sequence: u64) -> bool {
        sequence != 0 && sequence == self.dispatched
    }

    pub fn latest_dispatched(&self) -> u64 {
        self.dispatched
    }
}

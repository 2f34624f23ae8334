use crate::disruptor::Entry;

/// Minimal slot payload for unit tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub value: i64,
}

impl Entry for ValueEntry {
    fn copy_from(&mut self, other: &Self) {
        self.value = other.value;
    }
}

/// Consumer stand-in whose progress the test moves by hand
#[derive(Debug, Default)]
pub struct ManualConsumer {
    pub sequence: std::sync::Arc<crate::disruptor::Sequence>,
}

impl ManualConsumer {
    pub fn advance_to(&self, sequence: i64) {
        self.sequence.set(sequence);
    }
}

impl crate::disruptor::Consumer for ManualConsumer {
    fn sequence(&self) -> std::sync::Arc<crate::disruptor::Sequence> {
        self.sequence.clone()
    }

    fn halt(&self) {}
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub batches_selected: u64,
    pub items_clicked: u64,
    pub scroll_advances: u64,
    pub removal_commands: u64,
    pub confirmations: u64,
    pub deselections: u64,
    pub batches_finalized: u64,
}

impl EngineMetrics {
    pub fn record_batch(&mut self, clicked: usize) {
        self.batches_selected = self.batches_selected.saturating_add(1);
        self.items_clicked = self.items_clicked.saturating_add(clicked as u64);
    }

    pub fn record_scroll(&mut self) {
        self.scroll_advances = self.scroll_advances.saturating_add(1);
    }

    pub fn record_removal_command(&mut self) {
        self.removal_commands = self.removal_commands.saturating_add(1);
    }

    pub fn record_confirmation(&mut self) {
        self.confirmations = self.confirmations.saturating_add(1);
    }

    pub fn record_deselections(&mut self, count: usize) {
        self.deselections = self.deselections.saturating_add(count as u64);
    }

    pub fn record_finalized(&mut self) {
        self.batches_finalized = self.batches_finalized.saturating_add(1);
    }
}

use crate::events::EngineEvent;

/// Logical tick counter for the cooperative main loop. The absolute tick is
/// what scripts observe through the clock-pulse convention function.
pub struct TickClock {
    ticks: u64,
}

impl TickClock {
    pub fn new() -> Self {
        TickClock { ticks: 0 }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance by `pulses` ticks and produce the matching timer event.
    pub fn pulse(&mut self, pulses: u32) -> EngineEvent {
        self.ticks += pulses as u64;
        EngineEvent::Timer { tick: self.ticks, pulses }
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

//! Execution budgeter
//!
//! Counts executed instructions and fires an interrupt every `rate`
//! instructions. The first interrupt of a tick only raises the end-of-tick
//! flag and halves the rate, so host calls that return through the API gate
//! start suspending. A second interrupt in the same tick aborts the guest.

use super::errors::{VMError, VMResult};

#[derive(Debug, Clone)]
pub struct Budget {
    /// Configured instructions between interrupts
    speed: u32,
    /// Current interrupt rate
    rate: u32,
    /// Instructions left until the next interrupt
    countdown: u32,
    end_of_tick: bool,
    /// Instructions executed since the last install
    executed: u64,
}

impl Budget {
    pub fn new(speed: u32) -> Self {
        let speed = speed.max(1);
        Self {
            speed,
            rate: speed,
            countdown: speed,
            end_of_tick: false,
            executed: 0,
        }
    }

    /// Re-arm the interrupt at the configured speed and clear the end-of-tick flag
    pub fn install(&mut self) {
        self.rate = self.speed;
        self.countdown = self.speed;
        self.end_of_tick = false;
        self.executed = 0;
    }

    pub fn set_speed(
        &mut self,
        speed: u32,
    ) {
        self.speed = speed.max(1);
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    pub fn end_of_tick(&self) -> bool {
        self.end_of_tick
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Account for one instruction
    #[inline]
    pub fn step(&mut self) -> VMResult<()> {
        self.executed += 1;
        self.countdown -= 1;
        if self.countdown == 0 {
            self.interrupt()?;
        }
        Ok(())
    }

    fn interrupt(&mut self) -> VMResult<()> {
        if self.end_of_tick {
            return Err(VMError::OutOfTime);
        }
        self.end_of_tick = true;
        self.rate = (self.rate / 2).max(1);
        self.countdown = self.rate;
        Ok(())
    }
}

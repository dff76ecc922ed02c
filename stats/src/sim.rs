use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sim {
    pub cycles: u64,
    /// Processor requests retired over all cores
    pub retired: u64,
    /// Cycles in which no component made progress
    pub idle_cycles: u64,
}

impl std::ops::AddAssign for Sim {
    fn add_assign(&mut self, other: Self) {
        self.cycles += other.cycles;
        self.retired += other.retired;
        self.idle_cycles += other.idle_cycles;
    }
}

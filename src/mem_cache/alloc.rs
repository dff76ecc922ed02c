/// Clients of the directory allocator, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum DirClient {
    READ,
    WRITE,
    LLSC,
    CLEANUP,
    XRAM_RSP,
}

/// Clients of the transaction table allocator, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum TrtClient {
    READ,
    WRITE,
    LLSC,
    XRAM_RSP,
    IXR_RSP,
}

/// Clients of the update table allocator, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum UptClient {
    WRITE,
    XRAM_RSP,
    INIT_RSP,
    CLEANUP,
    LLSC,
}

pub trait Allocator<C>: std::fmt::Debug + Send + Sync + 'static {
    /// The client currently owning the resource
    #[must_use]
    fn granted(&self) -> C;

    /// Re-arbitrates once the owner stops holding the resource.
    fn update(&mut self, holding: impl Fn(C) -> bool, requesting: impl Fn(C) -> bool);
}

/// Round-robin allocator of a shared table.
///
/// The grant moves only when its owner leaves its critical states.
/// The next owner is the first requesting client after the current
/// one in priority order.
#[derive(Debug, Clone)]
pub struct RoundRobin<C> {
    order: Vec<C>,
    current: usize,
}

impl<C> RoundRobin<C>
where
    C: strum::IntoEnumIterator + Copy,
{
    #[must_use]
    pub fn new() -> Self {
        let order: Vec<C> = C::iter().collect();
        assert!(!order.is_empty());
        Self {
            current: order.len() - 1,
            order,
        }
    }
}

impl<C> Default for RoundRobin<C>
where
    C: strum::IntoEnumIterator + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Allocator<C> for RoundRobin<C>
where
    C: std::fmt::Debug + Copy + Send + Sync + 'static,
{
    #[inline]
    fn granted(&self) -> C {
        self.order[self.current]
    }

    fn update(&mut self, holding: impl Fn(C) -> bool, requesting: impl Fn(C) -> bool) {
        if holding(self.granted()) {
            return;
        }
        let n = self.order.len();
        if let Some(next) = (1..=n)
            .map(|i| (self.current + i) % n)
            .find(|&i| requesting(self.order[i]))
        {
            self.current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Allocator, DirClient, RoundRobin};

    #[test]
    fn test_holder_keeps_grant() {
        let mut alloc: RoundRobin<DirClient> = RoundRobin::new();
        alloc.update(|_| false, |c| c == DirClient::WRITE);
        assert_eq!(alloc.granted(), DirClient::WRITE);
        alloc.update(|c| c == DirClient::WRITE, |_| true);
        assert_eq!(alloc.granted(), DirClient::WRITE);
    }

    #[test]
    fn test_round_robin_after_release() {
        let mut alloc: RoundRobin<DirClient> = RoundRobin::new();
        // the initial owner is the last client so READ wins first
        alloc.update(|_| false, |_| true);
        assert_eq!(alloc.granted(), DirClient::READ);
        alloc.update(|_| false, |_| true);
        assert_eq!(alloc.granted(), DirClient::WRITE);
        alloc.update(|_| false, |c| c == DirClient::READ);
        assert_eq!(alloc.granted(), DirClient::READ);
    }

    #[test]
    fn test_no_request_keeps_owner() {
        let mut alloc: RoundRobin<DirClient> = RoundRobin::new();
        alloc.update(|_| false, |c| c == DirClient::CLEANUP);
        alloc.update(|_| false, |_| false);
        assert_eq!(alloc.granted(), DirClient::CLEANUP);
    }

    #[test]
    fn test_releasing_owner_can_win_again() {
        let mut alloc: RoundRobin<DirClient> = RoundRobin::new();
        alloc.update(|_| false, |c| c == DirClient::LLSC);
        alloc.update(|_| false, |c| c == DirClient::LLSC);
        assert_eq!(alloc.granted(), DirClient::LLSC);
    }
}

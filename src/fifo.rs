use std::collections::VecDeque;

/// A bounded first-in first-out queue.
///
/// Used for the command FIFOs between the target FSM of the
/// directory and the READ, WRITE and LLSC state machines.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fifo<T> {
    inner: VecDeque<T>,
    max_size: Option<usize>,
}

impl<T> std::fmt::Display for Fifo<T>
where
    T: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fifo({:>2}/{:<2}){:#?}",
            self.inner.len(),
            self.max_size
                .map(|max| max.to_string())
                .as_deref()
                .unwrap_or(""),
            self.inner
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
        )
    }
}

impl<T> Fifo<T> {
    #[must_use]
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            inner: VecDeque::new(),
            max_size,
        }
    }

    pub fn enqueue(&mut self, value: T) {
        debug_assert!(!self.full(), "enqueue into full fifo");
        self.inner.push_back(value);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.inner.front()
    }

    #[must_use]
    pub fn full(&self) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() >= max,
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Fifo;

    #[test]
    fn test_bounded_fifo() {
        let mut fifo: Fifo<u32> = Fifo::new(Some(2));
        assert!(fifo.is_empty());
        fifo.enqueue(1);
        fifo.enqueue(2);
        assert!(fifo.full());
        assert_eq!(fifo.first(), Some(&1));
        assert_eq!(fifo.dequeue(), Some(1));
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo.to_string().lines().next(), Some("Fifo( 1/2 )["));
    }
}

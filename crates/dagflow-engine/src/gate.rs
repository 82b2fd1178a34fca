use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// What a trigger should do after arriving at a join gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Dependencies are still outstanding; the trigger is recorded and nothing runs.
    Wait { satisfied: usize, required: usize },
    /// This caller won the claim and must run the node.
    Run,
    /// The node was already claimed, or more triggers arrived than it has dependencies.
    Rejected,
}

/// Per-node fan-in barrier.
///
/// `remaining` counts dependencies that have not yet succeeded. Every
/// successful predecessor arrives exactly once; the arrival that takes the
/// counter to zero then has to win `claimed` before it may run the node, so the
/// body executes at most once no matter how arrivals interleave.
#[derive(Debug)]
pub struct JoinGate {
    required: usize,
    remaining: AtomicUsize,
    claimed: AtomicBool,
}

impl JoinGate {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            remaining: AtomicUsize::new(required),
            claimed: AtomicBool::new(false),
        }
    }

    /// Number of dependencies this gate waits for.
    pub fn required(&self) -> usize {
        self.required
    }

    /// Number of dependencies that have arrived.
    pub fn satisfied(&self) -> usize {
        self.required - self.remaining.load(Ordering::Acquire)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Record that one dependency succeeded.
    pub fn arrive(&self) -> Arrival {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.try_claim(),
            Ok(n) => Arrival::Wait {
                satisfied: self.required - (n - 1),
                required: self.required,
            },
            Err(_) => Arrival::Rejected,
        }
    }

    /// Claim the right to run once every dependency has arrived.
    ///
    /// Used directly for nodes without dependencies.
    pub fn try_claim(&self) -> Arrival {
        if self.remaining.load(Ordering::Acquire) != 0 {
            return Arrival::Wait {
                satisfied: self.satisfied(),
                required: self.required,
            };
        }
        match self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Arrival::Run,
            Err(_) => Arrival::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_root_claims_once() {
        let gate = JoinGate::new(0);
        assert_eq!(gate.try_claim(), Arrival::Run);
        assert_eq!(gate.try_claim(), Arrival::Rejected);
        assert!(gate.is_claimed());
    }

    #[test]
    fn test_waits_until_last_arrival() {
        let gate = JoinGate::new(3);
        assert_eq!(gate.arrive(), Arrival::Wait { satisfied: 1, required: 3 });
        assert_eq!(gate.arrive(), Arrival::Wait { satisfied: 2, required: 3 });
        assert_eq!(gate.try_claim(), Arrival::Wait { satisfied: 2, required: 3 });
        assert_eq!(gate.arrive(), Arrival::Run);
        assert_eq!(gate.satisfied(), 3);
    }

    #[test]
    fn test_extra_arrival_rejected() {
        let gate = JoinGate::new(1);
        assert_eq!(gate.arrive(), Arrival::Run);
        assert_eq!(gate.arrive(), Arrival::Rejected);
        assert_eq!(gate.try_claim(), Arrival::Rejected);
    }

    #[test]
    fn test_concurrent_arrivals_run_exactly_once() {
        const DEPS: usize = 16;

        for _ in 0..200 {
            let gate = Arc::new(JoinGate::new(DEPS));
            let barrier = Arc::new(Barrier::new(DEPS));

            let handles: Vec<_> = (0..DEPS)
                .map(|_| {
                    let gate = gate.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        gate.arrive()
                    })
                })
                .collect();

            let runs = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|a| *a == Arrival::Run)
                .count();
            assert_eq!(runs, 1);
        }
    }
}

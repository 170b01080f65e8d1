use std::time::Duration;

use tokio::time::Instant;

use crate::{
    client::AcmeAccount,
    issue::{Phase, RunState},
    ChallengeStatus, Error, Result,
};

/// Timing knobs of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Wait between publishing tokens and the first validation request.
    ///
    /// Tokens have to reach whatever serves them before the CA fetches them. If the serving path
    /// is slower than this the first rounds get rejected as malformed and are retried.
    pub settle_delay: Duration,

    /// First wait between validation rounds.
    pub initial_backoff: Duration,

    /// Waits double until they reach this value.
    pub max_backoff: Duration,

    /// Fixed wait between order polls while the CA is processing the CSR.
    pub finalize_interval: Duration,

    /// Give up validation after this long. `None` polls until the CA decides.
    pub validation_timeout: Option<Duration>,

    /// Give up on a processing order after this long. `None` polls until the CA decides.
    pub finalize_timeout: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(640),
            finalize_interval: Duration::from_secs(1),
            validation_timeout: Some(Duration::from_secs(60 * 60)),
            finalize_timeout: Some(Duration::from_secs(10 * 60)),
        }
    }
}

/// Capped exponential backoff: doubles each step, never exceeding the cap.
///
/// There is no step limit; bound the total time with a [`Deadline`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// Returns the current wait and advances to the next one.
    pub fn step(&mut self) -> Duration {
        let wait = self.next;
        if self.next < self.max {
            self.next = self.next.saturating_mul(2).min(self.max);
        }
        wait
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.step())
    }
}

/// Wall-clock budget threaded through a polling loop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// Starts counting now. `None` never expires.
    pub fn after(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn unbounded() -> Self {
        Self::after(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.limit.is_some_and(|limit| self.elapsed() >= limit)
    }

    fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    /// Sleeps for `wait`, cut short when the deadline comes first.
    pub async fn sleep(&self, wait: Duration) {
        let wait = match self.remaining() {
            Some(remaining) => wait.min(remaining),
            None => wait,
        };
        tokio::time::sleep(wait).await;
    }
}

/// Drives published challenges until the CA stops reporting any of them as pending.
#[derive(Debug)]
pub struct ValidationPoller {
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ValidationPoller {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }

    /// Runs validation rounds until every challenge is valid.
    ///
    /// Each round requests validation of every challenge still pending, then polls them. A
    /// request rejected as malformed is retried next round. An invalid challenge ends the run
    /// with [`Error::ChallengeInvalid`], running out of `deadline` with
    /// [`Error::ValidationStalled`].
    pub async fn await_valid<A: AcmeAccount>(
        &self,
        state: &mut RunState<A>,
        deadline: &Deadline,
    ) -> Result<()> {
        let RunState {
            account,
            challenges,
            ..
        } = state;

        let mut backoff = Backoff::new(self.initial_backoff, self.max_backoff);
        let mut round = 0_u32;

        loop {
            round += 1;

            // processing ones are already being validated
            for challenge in challenges
                .iter()
                .filter(|c| c.status == ChallengeStatus::Pending)
            {
                match account.request_challenge_validation(challenge).await {
                    Ok(()) => {}
                    Err(err) if err.is_malformed() => {
                        log::debug!(
                            "Validation request for {} rejected in round {round}: {err}",
                            challenge.domain
                        );
                    }
                    Err(err) => return Err(err),
                }
            }

            for challenge in challenges.iter_mut().filter(|c| c.is_pending()) {
                let status = account.poll_challenge_status(challenge).await?;
                log::debug!("Challenge for {} is {status:?}", challenge.domain);
            }

            if let Some(invalid) = challenges.iter().find(|c| c.is_invalid()) {
                return Err(Error::ChallengeInvalid {
                    domain: invalid.domain.clone(),
                    problem: invalid.error.clone(),
                });
            }

            let pending = challenges
                .iter()
                .filter(|c| c.is_pending())
                .map(|c| c.domain.clone())
                .collect::<Vec<_>>();

            if pending.is_empty() {
                break;
            }

            if deadline.is_expired() {
                return Err(Error::ValidationStalled {
                    pending,
                    waited: deadline.elapsed(),
                });
            }

            let wait = backoff.step();
            log::info!(
                "{} challenge(s) still pending, waiting {}s ...",
                pending.len(),
                wait.as_secs()
            );
            deadline.sleep(wait).await;
        }

        log::info!("Challenges are all valid now");
        state.advance(Phase::Validated);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{Call, MockCa};

    fn secs(s: &[u64]) -> Vec<Duration> {
        s.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = PollingConfig::default();
        let waits = Backoff::new(config.initial_backoff, config.max_backoff)
            .take(11)
            .collect::<Vec<_>>();

        assert_eq!(
            waits,
            secs(&[5, 10, 20, 40, 80, 160, 320, 640, 640, 640, 640])
        );
    }

    #[test]
    fn backoff_never_overshoots_odd_cap() {
        let waits = Backoff::new(Duration::from_secs(3), Duration::from_secs(100))
            .take(8)
            .collect::<Vec<_>>();
        assert_eq!(waits, secs(&[3, 6, 12, 24, 48, 96, 100, 100]));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_sleep_short() {
        let deadline = Deadline::after(Some(Duration::from_secs(7)));
        deadline.sleep(Duration::from_secs(60)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.elapsed(), Duration::from_secs(7));

        assert!(!Deadline::unbounded().is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_requests_are_retried_next_round() {
        let dir = tempfile::tempdir().unwrap();
        let ca = MockCa::new(&["a.com"]);
        ca.reject_validation_as_malformed("a.com", 2);
        ca.script_challenge("a.com", &[ChallengeStatus::Pending, ChallengeStatus::Pending]);

        let mut state = ca.published_state(dir.path()).await;
        let poller = ValidationPoller::new(&PollingConfig::default());
        poller.await_valid(&mut state, &Deadline::unbounded()).await.unwrap();

        assert_eq!(ca.count(|c| matches!(c, Call::RequestValidation(d) if d == "a.com")), 3);
        assert_eq!(state.phase(), Phase::Validated);
    }

    #[tokio::test(start_paused = true)]
    async fn other_validation_errors_abort() {
        let dir = tempfile::tempdir().unwrap();
        let ca = MockCa::new(&["a.com"]);
        ca.fail_validation_with_network_error("a.com");

        let mut state = ca.published_state(dir.path()).await;
        let poller = ValidationPoller::new(&PollingConfig::default());
        let err = poller
            .await_valid(&mut state, &Deadline::unbounded())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network(_)), "{err}");
        assert_eq!(ca.count(|c| matches!(c, Call::PollChallenge(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_challenge_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ca = MockCa::new(&["a.com", "b.com"]);
        ca.script_challenge("a.com", &[ChallengeStatus::Pending, ChallengeStatus::Pending]);
        ca.script_challenge("b.com", &[ChallengeStatus::Invalid]);

        let mut state = ca.published_state(dir.path()).await;
        let poller = ValidationPoller::new(&PollingConfig::default());
        let err = poller
            .await_valid(&mut state, &Deadline::unbounded())
            .await
            .unwrap_err();

        match err {
            Error::ChallengeInvalid { domain, problem } => {
                assert_eq!(domain, "b.com");
                assert!(problem.is_some());
            }
            err => panic!("unexpected error: {err}"),
        }

        // stopped after the first round
        assert_eq!(ca.count(|c| matches!(c, Call::PollChallenge(d) if d == "a.com")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalls_after_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let ca = MockCa::new(&["a.com"]);
        ca.script_challenge("a.com", &[ChallengeStatus::Pending; 100]);

        let mut state = ca.published_state(dir.path()).await;
        let poller = ValidationPoller::new(&PollingConfig::default());
        let deadline = Deadline::after(Some(Duration::from_secs(60)));
        let err = poller.await_valid(&mut state, &deadline).await.unwrap_err();

        match err {
            Error::ValidationStalled { pending, waited } => {
                assert_eq!(pending, ["a.com"]);
                assert_eq!(waited, Duration::from_secs(60));
            }
            err => panic!("unexpected error: {err}"),
        }

        // 5 + 10 + 20 brings us to 35s, the next wait is cut to the remaining 25s
        assert_eq!(ca.count(|c| matches!(c, Call::PollChallenge(_))), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn processing_counts_as_pending() {
        let dir = tempfile::tempdir().unwrap();
        let ca = MockCa::new(&["a.com"]);
        ca.script_challenge("a.com", &[ChallengeStatus::Processing]);

        let mut state = ca.published_state(dir.path()).await;
        let started = Instant::now();
        let poller = ValidationPoller::new(&PollingConfig::default());
        poller.await_valid(&mut state, &Deadline::unbounded()).await.unwrap();

        assert_eq!(ca.count(|c| matches!(c, Call::PollChallenge(_))), 2);
        // processing challenges are polled but not re-submitted
        assert_eq!(ca.count(|c| matches!(c, Call::RequestValidation(_))), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}

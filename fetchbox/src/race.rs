//! Deadline race around a transport call.

use std::future::Future;
use std::sync::Arc;

use fetchbox_core::FetchValue;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::RequestConfig;
use crate::error::FetchError;
use crate::invoker::Invoked;
use crate::timer::TimerRegistry;

enum Winner<T> {
    Transport(T),
    Deadline,
    /// The deadline timer was cancelled by a bulk clear; wait for the transport.
    Disarmed,
}

/// Races `transport` against the configured deadline.
///
/// When the deadline wins, `signal` is cancelled, the transport future is
/// dropped and a timeout error is returned; nothing the transport produces
/// afterwards can reach the caller or the cache. When the transport wins, the
/// deadline timer is cancelled.
pub(crate) async fn race<F>(
    timers: &TimerRegistry,
    config: &Arc<RequestConfig>,
    signal: CancellationToken,
    transport: F,
) -> Result<FetchValue, FetchError>
where
    F: Future<Output = Result<Invoked, FetchError>>,
{
    let (fire, fired) = oneshot::channel::<()>();
    let timer = timers.timeout.arm(config.timeout(), async move {
        let _ = fire.send(());
    });

    tokio::pin!(transport);
    let winner = tokio::select! {
        biased;
        outcome = &mut transport => Winner::Transport(outcome),
        deadline = fired => match deadline {
            Ok(()) => Winner::Deadline,
            Err(_) => Winner::Disarmed,
        },
    };

    let outcome = match winner {
        Winner::Transport(outcome) => {
            timers.timeout.cancel(&timer);
            outcome
        }
        Winner::Deadline => {
            signal.cancel();
            crate::metrics::record_timeout();
            return Err(FetchError::timeout(Arc::clone(config)));
        }
        Winner::Disarmed => transport.await,
    };
    outcome.map(|invoked| unwrap(config, invoked))
}

/// Shapes a classified outcome into the value the caller receives.
pub(crate) fn unwrap(config: &RequestConfig, invoked: Invoked) -> FetchValue {
    match invoked {
        Invoked::Raw(response) => FetchValue::Raw(response),
        Invoked::Parsed { data, headers } if config.response_header_keys.is_some() => {
            FetchValue::WithHeaders { data, headers }
        }
        Invoked::Parsed { data, .. } => FetchValue::Data(data),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fetchbox_core::{Payload, ResponseHeaders};

    use super::*;

    fn parsed(text: &str) -> Invoked {
        Invoked::Parsed {
            data: Payload::Text(text.to_owned()),
            headers: ResponseHeaders::new(),
        }
    }

    fn config(timeout: Duration) -> Arc<RequestConfig> {
        Arc::new(RequestConfig::default().with_timeout(timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn transport_wins_and_disarms_the_timer() {
        let timers = TimerRegistry::new();
        let signal = CancellationToken::new();
        let config = config(Duration::from_millis(100));

        let value = race(&timers, &config, signal.clone(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(parsed("fast"))
        })
        .await
        .unwrap();

        assert_eq!(value, FetchValue::Data(Payload::Text("fast".to_owned())));
        assert!(!signal.is_cancelled());
        assert_eq!(timers.pending().timeout, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_wins_and_cancels_the_signal() {
        let timers = TimerRegistry::new();
        let signal = CancellationToken::new();
        let config = config(Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let err = race(&timers, &config, signal.clone(), async {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            Ok(parsed("late"))
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.message(), "timeout");
        assert_eq!(err.status(), Some(504));
        assert!(signal.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(200));
        tokio::task::yield_now().await;
        assert_eq!(timers.pending().timeout, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_beats_a_transport_that_stops_on_cancel() {
        let timers = TimerRegistry::new();
        let signal = CancellationToken::new();
        let config = config(Duration::from_millis(100));

        let watched = signal.clone();
        let err = race(&timers, &config, signal.clone(), async move {
            watched.cancelled().await;
            Ok(parsed("aborted"))
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.status(), Some(504));
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_deadline_waits_for_the_transport() {
        let timers = Arc::new(TimerRegistry::new());
        let config = config(Duration::from_millis(100));

        let clear = Arc::clone(&timers);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            clear.clear_all();
        });

        let value = race(&timers, &config, CancellationToken::new(), async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(parsed("slow"))
        })
        .await
        .unwrap();
        assert_eq!(value, FetchValue::Data(Payload::Text("slow".to_owned())));
    }

    #[test]
    fn header_selection_keeps_headers() {
        let config = RequestConfig::default().with_response_header_keys(["x-total"]);
        let value = unwrap(&config, parsed("body"));
        assert!(matches!(value, FetchValue::WithHeaders { .. }));
    }
}

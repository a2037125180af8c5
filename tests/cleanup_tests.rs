mod test_helpers;

use std::time::Duration;

use coalescer::settings::CleanupConfig;
use coalescer::{RequestStatus, SchedulerError};
use test_helpers::*;

#[coalescer::test(start_paused = true)]
async fn cleanup_evicts_only_old_terminal_results() {
    let (_upstream, scheduler) = echo_scheduler();

    let done = scheduler.submit(kw(&[("alpha", 1)]), 1).unwrap();
    advance_ms(2000).await;
    scheduler.flush_if_due().await;
    let waiting = scheduler.submit(kw(&[("beta", 1)]), 1).unwrap();

    assert_eq!(scheduler.cleanup(Duration::from_secs(60)), 0);

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(scheduler.cleanup(Duration::from_secs(60)), 1);
    assert_eq!(
        scheduler.get_result(&done).unwrap_err(),
        SchedulerError::NotFound(done)
    );
    assert_eq!(
        scheduler.get_result(&waiting).unwrap().status,
        RequestStatus::Pending
    );
    assert_eq!(scheduler.stats().stored_results, 1);
}

#[coalescer::test(start_paused = true)]
async fn evicted_request_is_skipped_at_dispatch() {
    let (upstream, scheduler) = echo_scheduler();
    let id = scheduler.submit(kw(&[("alpha", 1)]), 1).unwrap();
    scheduler
        .await_result(&id, Duration::from_millis(10))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(scheduler.cleanup(Duration::from_secs(1)), 1);

    assert_eq!(scheduler.flush_if_due().await, 1);
    assert_eq!(upstream.batch_calls(), 0);
    assert!(scheduler.get_result(&id).is_err());
}

#[coalescer::test(start_paused = true)]
async fn periodic_sweep_runs_while_started() {
    with_timeout!(600_000, {
        let upstream = coalescer::MockUpstream::new_arc();
        let scheduler = scheduler_with(upstream, test_config()).with_cleanup(CleanupConfig {
            result_ttl_secs: Some(60),
            interval_secs: 10,
        });
        scheduler.start();

        let id = scheduler.submit(kw(&[("alpha", 1)]), 1).unwrap();
        let result = scheduler.await_result_default(&id).await.unwrap();
        assert_eq!(result.status, RequestStatus::Completed);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(scheduler.get_result(&id).is_ok());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(scheduler.get_result(&id).is_err());

        scheduler.stop();
    });
}

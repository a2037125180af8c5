mod test_helpers;

use std::sync::Arc;

use coalescer::outcome::FailureKind;
use coalescer::settings::PromptConfig;
use coalescer::upstream::echo_single;
use coalescer::{BatchScheduler, NullUpstream, RequestStatus, UpstreamError};
use test_helpers::*;

#[coalescer::test(start_paused = true)]
async fn unavailable_upstream_falls_back_per_request() {
    let (upstream, scheduler) = echo_scheduler();
    upstream.set_available(false);

    let ids = [
        scheduler.submit(kw(&[("alpha", 5), ("beta", 3)]), 5).unwrap(),
        scheduler.submit(kw(&[("gamma", 4)]), 5).unwrap(),
        scheduler.submit(kw(&[("delta", 2), ("epsilon", 9)]), 1).unwrap(),
    ];
    advance_ms(1000).await;
    assert_eq!(scheduler.flush_if_due().await, 3);

    assert_eq!(upstream.batch_calls(), 0);
    assert_eq!(upstream.single_calls(), 3);
    for id in &ids {
        assert_eq!(scheduler.get_result(id).unwrap().status, RequestStatus::Completed);
    }
    assert_eq!(
        scheduler.get_result(&ids[2]).unwrap().top_keys.unwrap(),
        vec!["epsilon"]
    );

    let stats = scheduler.stats();
    assert_eq!(stats.total_batches, 1);
    assert_eq!(stats.individual_batches, 1);
    assert_eq!(stats.estimated_savings, 0);
}

#[coalescer::test(start_paused = true)]
async fn fallback_failures_are_isolated() {
    let (upstream, scheduler) = echo_scheduler();
    upstream.set_available(false);
    upstream.respond_to_single(|payload| {
        if payload.contains("keys: broken") {
            Err(UpstreamError::Quota("out of credits".into()))
        } else if payload.contains("keys: stray") {
            Ok("nothing, relevant".to_string())
        } else {
            Ok(echo_single(payload))
        }
    });

    let ok = scheduler.submit(kw(&[("fine", 1)]), 1).unwrap();
    let broken = scheduler.submit(kw(&[("broken", 1)]), 1).unwrap();
    let stray = scheduler.submit(kw(&[("stray", 1)]), 1).unwrap();
    let also_ok = scheduler.submit(kw(&[("good", 1)]), 1).unwrap();
    advance_ms(1000).await;
    scheduler.flush_if_due().await;

    assert_eq!(scheduler.get_result(&ok).unwrap().status, RequestStatus::Completed);
    assert_eq!(scheduler.get_result(&also_ok).unwrap().status, RequestStatus::Completed);

    let failed = scheduler.get_result(&broken).unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    let error = failed.error.unwrap();
    assert_eq!(error.kind, FailureKind::Upstream);
    assert!(error.message.contains("out of credits"));

    let missed = scheduler.get_result(&stray).unwrap();
    assert_eq!(missed.error.unwrap().kind, FailureKind::ReconciliationMiss);
}

#[coalescer::test(start_paused = true)]
async fn single_payload_carries_subject_and_candidates() {
    let (upstream, scheduler) = echo_scheduler();
    upstream.set_available(false);

    scheduler
        .submit_with_subject("Acme Corp", kw(&[("chips", 3), ("exports", 2)]), 5)
        .unwrap();
    advance_ms(2000).await;
    scheduler.flush_if_due().await;

    let payloads = upstream.single_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("subject: Acme Corp"));
    assert!(payloads[0].contains("keys: chips, exports"));
}

#[coalescer::test(start_paused = true)]
async fn null_upstream_fails_every_request() {
    let scheduler = BatchScheduler::new(
        test_config(),
        &PromptConfig::default(),
        Arc::new(NullUpstream),
        None,
    )
    .unwrap_or_else(|e| panic!("{e}"));

    let ids = [
        scheduler.submit(kw(&[("a", 1)]), 1).unwrap(),
        scheduler.submit(kw(&[("b", 1)]), 1).unwrap(),
    ];
    advance_ms(1000).await;
    scheduler.flush_if_due().await;

    for id in &ids {
        let result = scheduler.get_result(id).unwrap();
        assert_eq!(result.status, RequestStatus::Failed);
        assert_eq!(result.error.unwrap().message, "upstream unavailable");
    }
    assert_eq!(scheduler.stats().individual_batches, 1);
}

#[coalescer::test(start_paused = true)]
async fn availability_is_checked_per_batch() {
    let (upstream, scheduler) = echo_scheduler();

    upstream.set_available(false);
    scheduler.submit(kw(&[("a", 1)]), 1).unwrap();
    advance_ms(2000).await;
    scheduler.flush_if_due().await;

    upstream.set_available(true);
    scheduler.submit(kw(&[("b", 1)]), 1).unwrap();
    advance_ms(2000).await;
    scheduler.flush_if_due().await;

    assert_eq!(upstream.single_calls(), 1);
    assert_eq!(upstream.batch_calls(), 1);
}

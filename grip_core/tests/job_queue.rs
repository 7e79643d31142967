//! Job queue behavior on real threads with short delays.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use grip_core::config::QueueCfg;
use grip_core::error::JobError;
use grip_core::job_queue::{JobEvent, JobOptions, JobQueue};

const WAIT: Duration = Duration::from_secs(3);

fn queue(concurrency: usize, retry_ms: u64) -> (JobQueue<i32>, xch::Receiver<JobEvent>) {
    let (tx, rx) = xch::unbounded();
    let q = JobQueue::with_events(
        QueueCfg {
            concurrency,
            retry_delay: Duration::from_millis(retry_ms),
        },
        tx,
    );
    (q, rx)
}

/// Run the queue until idle and return every event it reported.
fn settle(q: &mut JobQueue<i32>, rx: &xch::Receiver<JobEvent>) -> Vec<JobEvent> {
    assert!(q.wait_idle(WAIT), "queue went idle");
    rx.try_iter().collect()
}

fn recording(q: &mut JobQueue<i32>) -> Arc<Mutex<Vec<i32>>> {
    let order = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&order);
    q.register_handler("send", move |p: &i32| {
        log.lock().expect("lock").push(*p);
        Ok(())
    })
    .expect("register");
    order
}

fn with_priority(priority: i32) -> JobOptions {
    JobOptions {
        priority,
        ..JobOptions::default()
    }
}

#[test]
fn always_failing_job_is_attempted_exactly_max_attempts_times() {
    let (mut q, rx) = queue(1, 5);
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    q.register_handler("send", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Err(JobError::Handler("peer down".into()))
    })
    .expect("register");
    let id = q
        .enqueue(
            "send",
            1,
            JobOptions {
                max_attempts: 3,
                ..JobOptions::default()
            },
        )
        .expect("enqueue");

    let events = settle(&mut q, &rx);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], JobEvent::Retry { attempt: 1, .. }));
    assert!(matches!(events[1], JobEvent::Retry { attempt: 2, .. }));
    match &events[2] {
        JobEvent::Failed {
            id: failed,
            attempts: 3,
            error,
            ..
        } => {
            assert_eq!(*failed, id);
            assert_eq!(*error, JobError::Handler("peer down".into()));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let stats = q.stats();
    assert_eq!((stats.failed, stats.retried, stats.completed), (1, 2, 0));
}

#[test]
fn higher_priority_dispatches_first() {
    let (mut q, rx) = queue(1, 5);
    let order = recording(&mut q);
    q.enqueue("send", 1, with_priority(1)).expect("enqueue");
    q.enqueue("send", 5, with_priority(5)).expect("enqueue");
    assert_eq!(settle(&mut q, &rx).len(), 2);
    assert_eq!(*order.lock().expect("lock"), vec![5, 1]);
}

#[test]
fn priority_holds_while_paused() {
    let (mut q, rx) = queue(1, 5);
    let order = recording(&mut q);
    q.pause();
    q.enqueue("send", 1, with_priority(1)).expect("enqueue");
    q.poll(Instant::now());
    q.enqueue("send", 5, with_priority(5)).expect("enqueue");
    q.resume();
    assert_eq!(settle(&mut q, &rx).len(), 2);
    assert_eq!(*order.lock().expect("lock"), vec![5, 1]);
}

#[test]
fn equal_priority_keeps_enqueue_order() {
    let (mut q, rx) = queue(1, 5);
    let order = recording(&mut q);
    for (payload, priority) in [(1, 0), (2, 3), (3, 0), (4, 3), (5, 0)] {
        q.enqueue("send", payload, with_priority(priority))
            .expect("enqueue");
    }
    assert_eq!(settle(&mut q, &rx).len(), 5);
    assert_eq!(*order.lock().expect("lock"), vec![2, 4, 1, 3, 5]);
}

#[test]
fn processing_never_exceeds_concurrency() {
    let (mut q, rx) = queue(2, 5);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    q.register_handler("send", move |_| {
        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(15));
        r.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    })
    .expect("register");
    for i in 0..8 {
        q.enqueue("send", i, JobOptions::default()).expect("enqueue");
    }
    let events = settle(&mut q, &rx);
    assert!(events.iter().all(|e| matches!(e, JobEvent::Completed { .. })));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(q.stats().completed, 8);
}

#[test]
fn timed_out_attempt_keeps_its_slot_until_the_worker_returns() {
    let (mut q, rx) = queue(1, 5);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (r, p, c) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&calls));
    q.register_handler("send", move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        r.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    })
    .expect("register");
    q.enqueue(
        "send",
        0,
        JobOptions {
            max_attempts: 3,
            timeout: Some(Duration::from_millis(20)),
            ..JobOptions::default()
        },
    )
    .expect("enqueue");

    let events = settle(&mut q, &rx);
    assert!(matches!(events.last(), Some(JobEvent::Failed { attempts: 3, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(q.stats().abandoned, 0);
}

#[test]
fn retries_back_off_exponentially() {
    let (mut q, rx) = queue(1, 30);
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&stamps);
    q.register_handler("send", move |_| {
        log.lock().expect("lock").push(Instant::now());
        Err(JobError::Handler("nope".into()))
    })
    .expect("register");
    q.enqueue(
        "send",
        0,
        JobOptions {
            max_attempts: 3,
            ..JobOptions::default()
        },
    )
    .expect("enqueue");
    let events = settle(&mut q, &rx);
    match &events[0] {
        JobEvent::Retry { delay, .. } => assert_eq!(*delay, Duration::from_millis(30)),
        other => panic!("unexpected {other:?}"),
    }
    match &events[1] {
        JobEvent::Retry { delay, .. } => assert_eq!(*delay, Duration::from_millis(60)),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(events[2], JobEvent::Failed { .. }));
    let stamps = stamps.lock().expect("lock");
    assert_eq!(stamps.len(), 3);
    assert!(stamps[1] - stamps[0] >= Duration::from_millis(30));
    assert!(stamps[2] - stamps[1] >= Duration::from_millis(60));
}

#[test]
fn slow_attempt_times_out_and_late_result_is_ignored() {
    let (mut q, rx) = queue(1, 5);
    q.register_handler("send", |_| {
        std::thread::sleep(Duration::from_millis(150));
        Ok(())
    })
    .expect("register");
    q.enqueue(
        "send",
        0,
        JobOptions {
            timeout: Some(Duration::from_millis(20)),
            ..JobOptions::default()
        },
    )
    .expect("enqueue");
    // Idle only once the abandoned worker reported back.
    let events = settle(&mut q, &rx);
    match events.as_slice() {
        [JobEvent::Failed { error, .. }] => {
            assert_eq!(*error, JobError::Timeout(Duration::from_millis(20)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(q.stats().completed, 0);
}

#[test]
fn missing_handler_fails_permanently_without_retry() {
    let (mut q, rx) = queue(1, 5);
    q.enqueue(
        "unregistered",
        0,
        JobOptions {
            max_attempts: 5,
            ..JobOptions::default()
        },
    )
    .expect("accepted at enqueue time");
    match settle(&mut q, &rx).as_slice() {
        [JobEvent::Failed {
            attempts, error, ..
        }] => {
            assert_eq!(*attempts, 1);
            assert_eq!(*error, JobError::NoHandler("unregistered".into()));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(q.stats().retried, 0);
}

#[test]
fn delayed_job_waits_before_running() {
    let (mut q, rx) = queue(1, 5);
    q.register_handler("send", |_| Ok(())).expect("register");
    let start = Instant::now();
    q.enqueue(
        "send",
        0,
        JobOptions {
            delay: Duration::from_millis(60),
            ..JobOptions::default()
        },
    )
    .expect("enqueue");
    q.poll(Instant::now());
    assert_eq!(q.stats().delayed, 1);
    let events = settle(&mut q, &rx);
    assert!(matches!(events.as_slice(), [JobEvent::Completed { .. }]));
    assert!(start.elapsed() >= Duration::from_millis(60));
}

#[test]
fn paused_queue_holds_jobs_until_resumed() {
    let (mut q, rx) = queue(1, 5);
    q.register_handler("send", |_| Ok(())).expect("register");
    q.pause();
    q.enqueue("send", 0, JobOptions::default()).expect("enqueue");
    assert!(!q.wait_idle(Duration::from_millis(50)));
    assert!(rx.try_recv().is_err());
    let stats = q.stats();
    assert!(stats.paused);
    assert_eq!(stats.pending, 1);
    q.resume();
    let events = settle(&mut q, &rx);
    assert!(matches!(
        events.as_slice(),
        [JobEvent::Completed { attempts: 1, .. }]
    ));
}

//! Unit tests for the push/pull message queue.

use std::sync::Arc;
use std::time::Duration;

use agent_conduit::session::MessageQueue;
use agent_conduit::AppError;

const WAIT: Duration = Duration::from_secs(2);

/// Items pushed before anyone waits come out in push order, once each.
#[tokio::test]
async fn buffered_items_are_delivered_in_order() {
    let queue = MessageQueue::new();
    queue.push(1);
    queue.push(2);
    queue.push(3);

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.next().await, Some(Ok(1)));
    assert_eq!(queue.next().await, Some(Ok(2)));
    assert_eq!(queue.next().await, Some(Ok(3)));
    assert!(queue.is_empty());
}

/// A waiting consumer is woken by the next push.
#[tokio::test]
async fn waiter_receives_pushed_item() {
    let queue = Arc::new(MessageQueue::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.next().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.push("hello");

    let got = tokio::time::timeout(WAIT, consumer)
        .await
        .expect("consumer must wake")
        .expect("task must not panic");
    assert_eq!(got, Some(Ok("hello")));
}

/// After a clean completion, buffered items drain first and then every `next`
/// reports end-of-stream.
#[tokio::test]
async fn completion_drains_then_ends() {
    let queue = MessageQueue::new();
    queue.push(7);
    assert!(queue.complete(None));

    assert_eq!(queue.next().await, Some(Ok(7)));
    assert_eq!(queue.next().await, None);
    assert_eq!(queue.next().await, None);
}

/// Pushing after completion is silently dropped.
#[tokio::test]
async fn push_after_completion_is_dropped() {
    let queue = MessageQueue::new();
    queue.complete(None);
    queue.push(1);

    assert!(queue.is_empty());
    assert_eq!(queue.next().await, None);
}

/// `complete(err)` with N waiters wakes all N with that error; a second
/// `complete` changes nothing.
#[tokio::test]
async fn completion_error_reaches_every_waiter() {
    let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new());
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = AppError::Transport("agent process exited with code 1".into());
    assert!(queue.complete(Some(err.clone())));
    assert!(!queue.complete(None), "second complete must be a no-op");

    for waiter in waiters {
        let got = tokio::time::timeout(WAIT, waiter)
            .await
            .expect("waiter must wake")
            .expect("task must not panic");
        assert_eq!(got, Some(Err(err.clone())));
    }
    assert_eq!(queue.next().await, Some(Err(err)));
}

/// A consumer that gives up on `next` does not swallow the next item.
#[tokio::test]
async fn abandoned_waiter_does_not_lose_items() {
    let queue = MessageQueue::new();

    let abandoned = tokio::time::timeout(Duration::from_millis(20), queue.next()).await;
    assert!(abandoned.is_err(), "nothing was pushed yet");

    queue.push(42);
    assert_eq!(queue.next().await, Some(Ok(42)));
}

/// A waiter dropped after an item was pushed for it leaves that item queued.
#[tokio::test]
async fn waiter_dropped_after_push_keeps_item() {
    let queue = MessageQueue::new();

    let mut pending = Box::pin(queue.next());
    let idle = tokio::time::timeout(Duration::from_millis(20), &mut pending).await;
    assert!(idle.is_err(), "nothing was pushed yet");

    queue.push(7);
    drop(pending);
    queue.push(8);

    assert_eq!(queue.next().await, Some(Ok(7)));
    assert_eq!(queue.next().await, Some(Ok(8)));
}

/// The wake-up of a dropped waiter passes to the next one still waiting.
#[tokio::test]
async fn dropped_waiter_hands_wakeup_to_next() {
    let queue = Arc::new(MessageQueue::new());

    let mut first = Box::pin(queue.next());
    let idle = tokio::time::timeout(Duration::from_millis(20), &mut first).await;
    assert!(idle.is_err(), "nothing was pushed yet");

    let second = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.next().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.push("only");
    drop(first);

    let got = tokio::time::timeout(WAIT, second)
        .await
        .expect("second waiter must wake")
        .expect("task must not panic");
    assert_eq!(got, Some(Ok("only")));
}

/// Waiters are served in the order they started waiting.
#[tokio::test]
async fn waiters_are_served_fifo() {
    let queue = Arc::new(MessageQueue::new());
    let first = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.next().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.next().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.push("a");
    queue.push("b");

    assert_eq!(first.await.expect("join"), Some(Ok("a")));
    assert_eq!(second.await.expect("join"), Some(Ok("b")));
}

use core::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use treebus::{topic, Bus, BusConfig, CloseReason, Error, FullPolicy, SubscribeOptions, Topic};

const TICK: Duration = Duration::from_millis(100);

#[tokio::test]
async fn basic_pubsub() {
    let bus = Bus::default();
    let conn = bus.connect();

    let mut sub = conn.subscribe(topic!["simple", "topic"]).unwrap();
    conn.publish(topic!["simple", "topic"], "Hello").unwrap();

    let msg = timeout(TICK, sub.recv()).await.unwrap().unwrap();
    assert_eq!(msg.payload, Bytes::from("Hello"));
    assert_eq!(msg.topic, topic!["simple", "topic"]);
    assert!(msg.reply_to.is_none());
}

#[tokio::test]
async fn wildcard_matching_fanout() {
    let bus = Bus::default();
    let conn = bus.connect();

    let matching: Vec<Topic> = vec![
        topic!["wild", "cards", "are", "fun"],
        topic!["wild", "cards", "are", "+"],
        topic!["wild", "+", "are", "fun"],
        topic!["wild", "+", "are", "#"],
        topic!["wild", "+", "#"],
        topic!["#"],
    ];
    let non_matching: Vec<Topic> = vec![
        topic!["wild", "cards", "are", "funny"],
        topic!["wild", "cards", "are", "+", "fun"],
        topic!["wild", "+", "+"],
        topic!["tame", "#"],
    ];

    let mut hits = Vec::new();
    for pattern in matching {
        hits.push(conn.subscribe(pattern).unwrap());
    }
    let mut misses = Vec::new();
    for pattern in non_matching {
        misses.push(conn.subscribe(pattern).unwrap());
    }

    conn.publish(topic!["wild", "cards", "are", "fun"], "p").unwrap();

    for sub in &mut hits {
        let msg = timeout(TICK, sub.recv()).await.unwrap().unwrap();
        assert_eq!(msg.payload, Bytes::from("p"), "pattern {}", sub.pattern());
    }
    for sub in &mut misses {
        assert!(
            timeout(TICK, sub.recv()).await.is_err(),
            "pattern {} should not match",
            sub.pattern()
        );
    }
}

#[tokio::test]
async fn drop_oldest_overflow() {
    let bus = Bus::default();
    let conn = bus.connect();

    let mut sub = conn.subscribe(topic!["flood"]).unwrap();
    for n in 1..=11 {
        conn.publish(topic!["flood"], format!("Message{n}")).unwrap();
    }

    for n in 2..=11 {
        let msg = timeout(TICK, sub.recv()).await.unwrap().unwrap();
        assert_eq!(msg.payload, Bytes::from(format!("Message{n}")));
    }
    assert_eq!(sub.dropped(), 1);
}

#[tokio::test]
async fn reject_newest_overflow() {
    let bus = Bus::default();
    let conn = bus.connect();

    let mut sub = conn
        .subscribe_with(
            topic!["flood"],
            SubscribeOptions {
                full: Some(FullPolicy::RejectNewest),
                ..Default::default()
            },
        )
        .unwrap();
    for n in 1..=11 {
        conn.publish(topic!["flood"], format!("Message{n}")).unwrap();
    }

    for n in 1..=10 {
        let msg = timeout(TICK, sub.recv()).await.unwrap().unwrap();
        assert_eq!(msg.payload, Bytes::from(format!("Message{n}")));
    }
    assert_eq!(sub.dropped(), 1);
}

#[tokio::test]
async fn retained_replay_with_wildcard_query() {
    let bus = Bus::default();
    let conn = bus.connect();

    conn.retain(topic!["ret", "a"], "A").unwrap();
    conn.retain(topic!["ret", "b"], "B").unwrap();
    conn.retain(topic!["ret", "c", "d"], "CD").unwrap();
    conn.unretain(topic!["ret", "b"]).unwrap();

    let mut sub = conn.subscribe(topic!["ret", "#"]).unwrap();
    let mut got = Vec::new();
    for _ in 0..2 {
        let msg = timeout(TICK, sub.recv()).await.unwrap().unwrap();
        got.push(msg.payload);
    }
    got.sort();
    assert_eq!(got, vec![Bytes::from("A"), Bytes::from("CD")]);
    assert!(timeout(TICK, sub.recv()).await.is_err());
}

#[tokio::test]
async fn retain_replaces_previous_value() {
    let bus = Bus::default();
    let conn = bus.connect();

    conn.retain(topic!["state"], "p1").unwrap();
    conn.retain(topic!["state"], "p2").unwrap();

    let mut sub = conn.subscribe(topic!["state"]).unwrap();
    let msg = timeout(TICK, sub.recv()).await.unwrap().unwrap();
    assert_eq!(msg.payload, Bytes::from("p2"));
    assert!(timeout(TICK, sub.recv()).await.is_err());
}

#[tokio::test]
async fn unretain_clears_state() {
    let bus = Bus::default();
    let conn = bus.connect();

    conn.retain(topic!["gone"], "p").unwrap();
    conn.unretain(topic!["gone"]).unwrap();
    assert!(!bus.has_retained());

    let mut sub = conn.subscribe(topic!["gone"]).unwrap();
    assert!(timeout(TICK, sub.recv()).await.is_err());
}

#[tokio::test]
async fn close_wakes_pending_receiver() {
    let bus = Bus::default();
    let conn = bus.connect();

    let mut sub = conn.subscribe(topic!["quiet"]).unwrap();
    let handle = tokio::spawn(async move {
        let outcome = sub.recv().await;
        (outcome, sub)
    });
    tokio::task::yield_now().await;

    // The receiver task owns the subscription, so close it from the bus
    // side via disconnect.
    conn.disconnect();

    let (outcome, sub) = timeout(TICK, handle).await.unwrap().unwrap();
    assert_eq!(outcome, Err(CloseReason::Disconnected));
    assert_eq!(sub.why(), Some(CloseReason::Disconnected));
}

#[tokio::test]
async fn unsubscribed_mailbox_drains_before_reason() {
    let bus = Bus::default();
    let conn = bus.connect();

    let mut sub = conn.subscribe(topic!["drain"]).unwrap();
    conn.publish(topic!["drain"], "one").unwrap();
    conn.publish(topic!["drain"], "two").unwrap();
    sub.unsubscribe();

    // No further publish can reach the closed mailbox.
    conn.publish(topic!["drain"], "three").unwrap();

    assert_eq!(sub.recv().await.unwrap().payload, Bytes::from("one"));
    assert_eq!(sub.recv().await.unwrap().payload, Bytes::from("two"));
    assert_eq!(sub.recv().await, Err(CloseReason::Unsubscribed));
    assert_eq!(sub.why(), Some(CloseReason::Unsubscribed));
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_restores_trie_shape() {
    let bus = Bus::default();
    let conn = bus.connect();
    assert!(!bus.has_subscriptions());

    let sub = conn.subscribe(topic!["a", "+", "#"]).unwrap();
    assert!(bus.has_subscriptions());

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!bus.has_subscriptions());

    drop(sub);
    assert!(!bus.has_subscriptions());
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes_it() {
    let bus = Bus::default();
    let conn = bus.connect();

    {
        let _sub = conn.subscribe(topic!["scoped"]).unwrap();
        assert!(bus.has_subscriptions());
    }
    assert!(!bus.has_subscriptions());
}

#[tokio::test]
async fn disconnect_is_idempotent_and_fails_later_operations() {
    let bus = Bus::default();
    let conn = bus.connect();
    let mut sub = conn.subscribe(topic!["x"]).unwrap();

    conn.disconnect();
    conn.disconnect();

    assert!(conn.is_disconnected());
    assert_eq!(sub.recv().await, Err(CloseReason::Disconnected));
    assert_eq!(
        conn.publish(topic!["x"], "p").unwrap_err(),
        Error::Disconnected
    );
    assert_eq!(
        conn.subscribe(topic!["x"]).unwrap_err(),
        Error::Disconnected
    );
    assert_eq!(conn.retain(topic!["x"], "p").unwrap_err(), Error::Disconnected);
    assert_eq!(conn.unretain(topic!["x"]).unwrap_err(), Error::Disconnected);
    assert_eq!(conn.bind(topic!["x"]).unwrap_err(), Error::Disconnected);
}

#[tokio::test]
async fn custom_wildcard_symbols() {
    let bus = Bus::new(BusConfig {
        wildcards: treebus::Wildcards {
            single: "*".to_owned(),
            multi: ">".to_owned(),
        },
        ..Default::default()
    });
    let conn = bus.connect();

    let mut star = conn.subscribe(topic!["a", "*"]).unwrap();
    let mut gt = conn.subscribe(topic![">"]).unwrap();
    // "+" is an ordinary token under this configuration.
    let mut plus = conn.subscribe(topic!["a", "+"]).unwrap();

    conn.publish(topic!["a", "b"], "p").unwrap();

    assert!(timeout(TICK, star.recv()).await.unwrap().is_ok());
    assert!(timeout(TICK, gt.recv()).await.unwrap().is_ok());
    assert!(timeout(TICK, plus.recv()).await.is_err());
}

#[tokio::test]
async fn publish_rejects_wildcard_topics() {
    let bus = Bus::default();
    let conn = bus.connect();

    assert!(matches!(
        conn.publish(topic!["a", "+"], "p"),
        Err(Error::Topic(_))
    ));
    assert!(matches!(
        conn.retain(topic!["a", "#"], "p"),
        Err(Error::Topic(_))
    ));
    assert!(matches!(
        conn.subscribe(topic!["a", "#", "b"]),
        Err(Error::Topic(_))
    ));
}

#[tokio::test]
async fn retained_replay_counts_against_mailbox_policy() {
    let bus = Bus::default();
    let conn = bus.connect();

    for n in 0..3 {
        conn.retain(topic!["ret", format!("k{n}")], format!("v{n}"))
            .unwrap();
    }

    let mut sub = conn
        .subscribe_with(
            topic!["ret", "#"],
            SubscribeOptions {
                queue_len: Some(2),
                full: Some(FullPolicy::RejectNewest),
            },
        )
        .unwrap();

    let mut received = 0;
    while let Ok(Ok(_)) = timeout(TICK, sub.recv()).await {
        received += 1;
    }
    assert_eq!(received, 2);
    assert_eq!(sub.dropped(), 1);
}

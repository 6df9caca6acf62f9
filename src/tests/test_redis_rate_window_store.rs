use std::{env, sync::Arc};

use redis::AsyncCommands;

use crate::{
    Admission, ConsumeDecision, DualAdmissionController, RateWindow, RateWindowStore, RedisKey,
    RedisRateWindowStore, SubjectId, TaskgateError, TaskgateRedisClient,
};

use super::runtime;

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> RedisKey {
    let n: u64 = rand::random();
    RedisKey::try_from(format!("taskgate_test_{n}")).unwrap()
}

fn subject(s: &str) -> SubjectId {
    SubjectId::try_from(s).unwrap()
}

async fn build_store(url: &str) -> (RedisRateWindowStore, redis::aio::ConnectionManager) {
    let client = redis::Client::open(url).unwrap();
    let cm = client.get_connection_manager().await.unwrap();
    let store = RedisRateWindowStore::new(
        TaskgateRedisClient::from_connection_manager(cm.clone()),
        Some(unique_prefix()),
    );

    (store, cm)
}

#[test]
fn consume_grants_points_then_denies_with_ttl() {
    let Some(url) = redis_url() else {
        return;
    };

    runtime::block_on(async {
        let (store, _cm) = build_store(&url).await;
        let w = RateWindow::from_raw("sustainedLimiter", 3, 60_000, 0).unwrap();

        for expected in [2, 1, 0] {
            assert_eq!(
                store.consume(&w, &subject("u1")).await.unwrap(),
                ConsumeDecision::Allowed {
                    remaining_points: expected
                }
            );
        }

        match store.consume(&w, &subject("u1")).await.unwrap() {
            ConsumeDecision::Denied { ms_before_next } => {
                assert!(ms_before_next > 0 && ms_before_next <= 60_000);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    });
}

#[test]
fn first_burst_denial_sets_block_ttl() {
    let Some(url) = redis_url() else {
        return;
    };

    runtime::block_on(async {
        let (store, mut cm) = build_store(&url).await;
        let w = RateWindow::from_raw("burstLimiter", 1, 1000, 60_000).unwrap();
        let key = store.key_for(&w, &subject("u1"));

        store.consume(&w, &subject("u1")).await.unwrap();
        let ttl: i64 = cm.pttl(&key).await.unwrap();
        assert!(ttl > 0 && ttl <= 1000);

        match store.consume(&w, &subject("u1")).await.unwrap() {
            ConsumeDecision::Denied { ms_before_next } => {
                assert!(ms_before_next > 59_000 && ms_before_next <= 60_000);
            }
            other => panic!("expected denial, got {other:?}"),
        }

        let ttl: i64 = cm.pttl(&key).await.unwrap();
        assert!(ttl > 59_000);

        let consumed: u64 = cm.get(&key).await.unwrap();
        assert_eq!(consumed, 2);

        let _: () = cm.del(&key).await.unwrap();
    });
}

#[test]
fn dual_admission_over_redis_matches_local_semantics() {
    let Some(url) = redis_url() else {
        return;
    };

    runtime::block_on(async {
        let (store, _cm) = build_store(&url).await;
        let admission = DualAdmissionController::new(
            Arc::new(store),
            RateWindow::from_raw("burstLimiter", 1, 1000, 60_000).unwrap(),
            RateWindow::from_raw("sustainedLimiter", 3, 60_000, 0).unwrap(),
        );

        assert_eq!(admission.admit(&subject("u1")).await.unwrap(), Admission::Accept);
        assert!(matches!(
            admission.admit(&subject("u1")).await.unwrap(),
            Admission::RejectBurst { delay_ms } if delay_ms > 59_000
        ));
        assert_eq!(admission.admit(&subject("u2")).await.unwrap(), Admission::Accept);
    });
}

#[test]
fn zero_connections_is_rejected() {
    runtime::block_on(async {
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let result = TaskgateRedisClient::from_client(client, 0, None).await;

        assert!(matches!(
            result,
            Err(TaskgateError::InvalidRedisClientConnectionCount(_))
        ));
    });
}

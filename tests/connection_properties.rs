//! Property-based tests for connection teardown order

use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use undertow::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn recording(log: &Arc<Mutex<Vec<usize>>>, index: usize) -> CancelToken<String> {
    let log = log.clone();
    CancelToken::new(move || async move {
        log.lock().unwrap().push(index);
        Ok(())
    })
}

proptest! {
    #[test]
    fn prop_cancel_runs_tokens_newest_first(count in 0usize..40) {
        let order = runtime().block_on(async {
            let log = Arc::new(Mutex::new(Vec::new()));
            let connection = Connection::<String>::new();
            for index in 0..count {
                connection.push(recording(&log, index)).await.unwrap();
            }
            connection.cancel().invoke().await.unwrap();
            let order = log.lock().unwrap().clone();
            order
        });

        let expected: Vec<usize> = (0..count).rev().collect();
        prop_assert_eq!(order, expected);
    }

    #[test]
    fn prop_popped_tokens_never_run(count in 1usize..20, popped in 0usize..20) {
        let popped = popped.min(count);
        let order = runtime().block_on(async {
            let log = Arc::new(Mutex::new(Vec::new()));
            let connection = Connection::<String>::new();
            for index in 0..count {
                connection.push(recording(&log, index)).await.unwrap();
            }
            for _ in 0..popped {
                connection.pop();
            }
            connection.cancel().invoke().await.unwrap();
            let order = log.lock().unwrap().clone();
            order
        });

        let expected: Vec<usize> = (0..count - popped).rev().collect();
        prop_assert_eq!(order, expected);
    }

    #[test]
    fn prop_failures_compose_newest_first(count in 1usize..10) {
        let result = runtime().block_on(async {
            let connection = Connection::<String>::new();
            for index in 0..count {
                let token = CancelToken::new(move || async move { Err(format!("t{index}")) });
                connection.push(token).await.unwrap();
            }
            connection.cancel().invoke().await
        });

        let expected = (0..count).rev().map(|i| format!("t{i}")).collect::<Vec<_>>().join("; ");
        prop_assert_eq!(result, Err(expected));
    }

    #[test]
    fn prop_every_token_runs_exactly_once_across_repeated_cancels(count in 0usize..20, cancels in 1usize..4) {
        let order = runtime().block_on(async {
            let log = Arc::new(Mutex::new(Vec::new()));
            let connection = Connection::<String>::new();
            for index in 0..count {
                connection.push(recording(&log, index)).await.unwrap();
            }
            for _ in 0..cancels {
                connection.cancel().invoke().await.unwrap();
            }
            let order = log.lock().unwrap().clone();
            order
        });

        prop_assert_eq!(order.len(), count);
    }
}

//! Session lifecycle scenarios driven through the command dispatcher.

mod common;

use serde_json::{Value, json};

use backplane_mcp_protocol::{ErrorKind, ProviderType};
use common::Fixture;

#[tokio::test]
async fn first_session_becomes_current_and_switch_is_explicit() {
    let fx = Fixture::mysql();

    fx.ok("connect_mysql", json!({"name": "a", "host": "primary"})).await;
    assert_eq!(fx.current(ProviderType::Mysql).await.as_deref(), Some("a"));

    fx.ok("mysql_exec", json!({"command": "SELECT 1"})).await;
    fx.ok("mysql_exec", json!({"command": "SELECT 2"})).await;

    let b = fx.ok("connect_mysql", json!({"name": "b", "host": "replica"})).await;
    assert_eq!(b["session"]["is_current"], false);
    assert_eq!(fx.current(ProviderType::Mysql).await.as_deref(), Some("a"));

    fx.ok("switch_mysql", json!({"name": "b"})).await;
    assert_eq!(fx.current(ProviderType::Mysql).await.as_deref(), Some("b"));

    for n in 0..5 {
        fx.ok("mysql_exec", json!({"command": format!("SELECT {}", n)})).await;
    }

    // a's history is its own: connect plus two execs
    let history = fx.ok("history_mysql", json!({"name": "a"})).await;
    assert_eq!(history["count"], 3);
    let commands: Vec<&str> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["command"].as_str().unwrap())
        .collect();
    assert_eq!(commands, vec!["connect", "exec", "exec"]);

    let history = fx.ok("history_mysql", json!({})).await;
    assert_eq!(history["session"]["id"], "b");
    assert_eq!(history["count"], 6);
}

#[tokio::test]
async fn duplicate_name_is_rejected_until_closed() {
    let fx = Fixture::new(&ProviderType::ALL, json!({}));

    for pt in ProviderType::ALL {
        let connect = format!("connect_{}", pt);
        fx.ok(&connect, json!({"name": "main"})).await;

        let err = fx.fail(&connect, json!({"name": "main"})).await;
        assert_eq!(err.kind(), ErrorKind::DuplicateSession);
        assert_eq!(err.context.provider, Some(pt));

        fx.ok(&format!("close_{}", pt), json!({"name": "main"})).await;
        let reopened = fx.ok(&connect, json!({"name": "main"})).await;
        assert_eq!(reopened["session"]["status"], "connected");
    }
}

#[tokio::test]
async fn same_name_is_independent_across_providers() {
    let fx = Fixture::new(&[ProviderType::Mysql, ProviderType::Redis], json!({}));
    fx.ok("connect_mysql", json!({"name": "shared"})).await;
    fx.ok("connect_redis", json!({"name": "shared"})).await;

    fx.ok("close_mysql", json!({})).await;
    assert_eq!(fx.current(ProviderType::Mysql).await, None);
    assert_eq!(fx.current(ProviderType::Redis).await.as_deref(), Some("shared"));
}

#[tokio::test]
async fn switch_to_missing_or_closed_session_keeps_current() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "a"})).await;
    fx.ok("connect_mysql", json!({"name": "b"})).await;
    fx.ok("close_mysql", json!({"name": "b"})).await;

    for target in ["nope", "b"] {
        let err = fx.fail("switch_mysql", json!({"name": target})).await;
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        assert_eq!(fx.current(ProviderType::Mysql).await.as_deref(), Some("a"));
    }
}

#[tokio::test]
async fn switch_accepts_list_position() {
    let fx = Fixture::mysql();
    for name in ["first", "second", "third"] {
        fx.ok("connect_mysql", json!({"name": name})).await;
    }

    // Newest first: position 2 is "second"
    let switched = fx.ok("switch_mysql", json!({"name": "2"})).await;
    assert_eq!(switched["current"]["id"], "second");
    assert_eq!(fx.current(ProviderType::Mysql).await.as_deref(), Some("second"));
}

#[tokio::test]
async fn closing_current_session_clears_it() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "a"})).await;
    fx.ok("connect_mysql", json!({"name": "b"})).await;

    let closed = fx.ok("close_mysql", json!({})).await;
    assert_eq!(closed["closed"]["id"], "a");
    assert_eq!(closed["current"], Value::Null);

    let err = fx.fail("current_mysql", json!({})).await;
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);
    let err = fx.fail("mysql_exec", json!({"command": "x"})).await;
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);

    fx.ok("switch_mysql", json!({"name": "b"})).await;
    assert_eq!(fx.current(ProviderType::Mysql).await.as_deref(), Some("b"));
}

#[tokio::test]
async fn close_with_switch_to_hands_over_current() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "a"})).await;
    fx.ok("connect_mysql", json!({"name": "b"})).await;

    let err = fx
        .fail("close_mysql", json!({"name": "a", "switch_to": "ghost"}))
        .await;
    assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    // Nothing was closed
    let list = fx.ok("list_mysql", json!({})).await;
    assert!(list["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["status"] == "connected"));

    let closed = fx.ok("close_mysql", json!({"switch_to": "b"})).await;
    assert_eq!(closed["closed"]["id"], "a");
    assert_eq!(closed["current"], "b");
}

#[tokio::test]
async fn closed_session_rejects_commands_but_keeps_history() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "a"})).await;
    fx.ok("mysql_exec", json!({"command": "x"})).await;
    fx.ok("close_mysql", json!({})).await;

    let err = fx
        .fail("mysql_exec", json!({"command": "y", "session_id": "a"}))
        .await;
    assert_eq!(err.kind(), ErrorKind::SessionNotConnected);

    let history = fx.ok("history_mysql", json!({"name": "a"})).await;
    assert_eq!(history["session"]["status"], "closed");
    assert!(history["count"].as_u64().unwrap() >= 2);

    // Closing again is harmless
    fx.ok("close_mysql", json!({"name": "a"})).await;
    assert_eq!(fx.provider(ProviderType::Mysql).disconnects(), 1);
}

#[tokio::test]
async fn history_is_capped_oldest_first_out() {
    let fx = Fixture::new(&[ProviderType::Redis], json!({"history_limit": 5}));
    fx.ok("connect_redis", json!({"name": "r"})).await;
    for n in 0..20 {
        fx.ok("exec", json!({"command": format!("SET k {}", n)})).await;
    }

    let history = fx.ok("history_redis", json!({})).await;
    assert_eq!(history["count"], 5);
    let summaries: Vec<String> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["args_summary"].as_str().unwrap().to_string())
        .collect();
    assert!(summaries[0].contains("SET k 15"), "{:?}", summaries);
    assert!(summaries[4].contains("SET k 19"), "{:?}", summaries);

    let limited = fx.ok("history_redis", json!({"limit": 2})).await;
    assert_eq!(limited["count"], 2);
}

#[tokio::test]
async fn failed_command_leaves_session_usable() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "a"})).await;

    let err = fx.fail("mysql_exec", json!({"command": "fail"})).await;
    assert_eq!(err.kind(), ErrorKind::ExecError);
    let payload = err.to_payload();
    assert_eq!(payload["session_id"], "a");
    assert_eq!(payload["provider"], "mysql");
    assert_eq!(payload["command"], "mysql_exec");

    let ok = fx.ok("mysql_exec", json!({"command": "SELECT 1"})).await;
    assert_eq!(ok["result"]["command"], "SELECT 1");
}

#[tokio::test]
async fn lost_connection_moves_session_to_error() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "a"})).await;

    let err = fx.fail("mysql_exec", json!({"command": "drop"})).await;
    assert_eq!(err.kind(), ErrorKind::ExecError);

    let current = fx.ok("current_mysql", json!({})).await;
    assert_eq!(current["session"]["status"], "error");
    let err = fx.fail("mysql_exec", json!({"command": "x"})).await;
    assert_eq!(err.kind(), ErrorKind::SessionNotConnected);
}

#[tokio::test]
async fn config_update_is_all_or_nothing_and_not_retroactive() {
    let fx = Fixture::mysql();
    fx.ok("connect_mysql", json!({"name": "before"})).await;

    let err = fx
        .fail(
            "update_config",
            json!({"history_limit": 2, "retry_policy": "sometimes"}),
        )
        .await;
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    let details = fx.ok("get_config_details", json!({})).await;
    assert_eq!(details["settings"]["history_limit"], 100);
    assert_eq!(details["settings"]["retry_policy"], "none");

    fx.ok("update_config", json!({"history_limit": 2})).await;
    fx.ok("connect_mysql", json!({"name": "after"})).await;

    for _ in 0..4 {
        fx.ok("mysql_exec", json!({"command": "x", "session_id": "before"})).await;
        fx.ok("mysql_exec", json!({"command": "x", "session_id": "after"})).await;
    }
    let before = fx.ok("history_mysql", json!({"name": "before"})).await;
    let after = fx.ok("history_mysql", json!({"name": "after"})).await;
    assert_eq!(before["count"], 5);
    assert_eq!(after["count"], 2);
}

#[tokio::test]
async fn connect_retries_follow_policy() {
    let fx = Fixture::new(
        &[ProviderType::Pulsar],
        json!({"retry_policy": "fixed", "max_retries": 2, "retry_delay_ms": 0}),
    );
    let provider = fx.provider(ProviderType::Pulsar);

    provider.fail_next_connects(2);
    fx.ok("connect_pulsar", json!({"name": "p"})).await;
    assert_eq!(provider.connect_attempts(), 3);

    provider.fail_next_connects(3);
    let err = fx.fail("connect_pulsar", json!({"name": "q"})).await;
    assert_eq!(err.kind(), ErrorKind::ConnectError);
    assert_eq!(provider.connect_attempts(), 6);

    let list = fx.ok("list_pulsar", json!({})).await;
    assert_eq!(list["current"], "p");
    assert_eq!(list["sessions"][0]["id"], "q");
    assert_eq!(list["sessions"][0]["status"], "error");
}

#[tokio::test]
async fn generated_names_are_unique() {
    let fx = Fixture::mysql();
    let first = fx.ok("connect_mysql", json!({"host": "db"})).await;
    let second = fx.ok("connect_mysql", json!({"host": "db"})).await;
    let a = first["session"]["id"].as_str().unwrap();
    let b = second["session"]["id"].as_str().unwrap();
    assert_eq!(a, "db");
    assert_ne!(a, b);
    assert!(b.starts_with("db"));
}

#[tokio::test]
async fn shutdown_closes_every_live_session() {
    let fx = Fixture::new(&[ProviderType::Mysql, ProviderType::Redis], json!({}));
    fx.ok("connect_mysql", json!({"name": "m1"})).await;
    fx.ok("connect_mysql", json!({"name": "m2"})).await;
    fx.ok("connect_redis", json!({"name": "r1"})).await;
    fx.ok("close_mysql", json!({"name": "m2"})).await;

    fx.server.shutdown().await;

    assert_eq!(fx.provider(ProviderType::Mysql).disconnects(), 2);
    assert_eq!(fx.provider(ProviderType::Redis).disconnects(), 1);
    let list = fx.ok("list_redis", json!({})).await;
    assert_eq!(list["sessions"][0]["status"], "closed");
    assert_eq!(list["current"], Value::Null);
}

mod common;

use common::{drain, init_tracing, next_json, send_json, spawn_agent};
use inspector::codec::{serialize, RemoteValue};
use inspector::{Console, Credentials, DateValue, DecodedValue, ScriptRunner};
use serde_json::json;

/// What the wrapped script emits for `{when: new Date(0)}` with `o.self = o`.
fn self_referencing_result() -> String {
    let o = RemoteValue::object();
    o.set("when", RemoteValue::Date(0.0));
    o.set("self", o.clone());
    serialize(&o)
}

#[tokio::test]
async fn evaluate_restores_dates_and_cycles() {
    init_tracing();
    let (endpoint, _agent) = spawn_agent(|mut ws| async move {
        let request = next_json(&mut ws).await;
        let code = request["Flow"]["Descriptive"]["code"].as_str().unwrap_or_default();
        assert!(code.starts_with("(function(){"));
        assert!(code.contains("var o = {when: new Date(0)}; o.self = o; return o;"));

        let reply = json!({
            "Action": "finished",
            "Decision": "accept",
            "Result": { "result": { "Value": self_referencing_result() } }
        });
        send_json(&mut ws, reply).await;
        drain(&mut ws).await;
    })
    .await;

    let runner = ScriptRunner::new(endpoint, Credentials::default());
    let mut console = Console::new().with_timeout(2_000);
    let value = console
        .evaluate(&runner, "app", "var o = {when: new Date(0)}; o.self = o; return o;")
        .await
        .unwrap();

    assert_eq!(value.get("when"), Some(&DecodedValue::Date(DateValue::Valid(0.0))));
    assert_eq!(
        value.get("self"),
        Some(&DecodedValue::Cyclic {
            path: "root".into()
        })
    );
    assert_eq!(console.history().len(), 1);
}

#[tokio::test]
async fn non_json_result_is_kept_verbatim() {
    init_tracing();
    let (endpoint, _agent) = spawn_agent(|mut ws| async move {
        let _ = next_json(&mut ws).await;
        send_json(
            &mut ws,
            json!({ "Action": "finished", "Result": { "result": { "Value": "not json" } } }),
        )
        .await;
        drain(&mut ws).await;
    })
    .await;

    let runner = ScriptRunner::new(endpoint, Credentials::default());
    let mut console = Console::new();
    assert_eq!(
        console.evaluate(&runner, "app", "return undefined;").await.unwrap(),
        DecodedValue::String("not json".into())
    );
}

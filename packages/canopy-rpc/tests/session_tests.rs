use canopy_rpc::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn session() -> (RpcSession, Outbound) {
    RpcSession::new(SessionConfig::default().with_request_timeout(Some(Duration::from_secs(5))))
}

async fn next_message(outbound: &mut Outbound) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
        .await
        .expect("no outbound message within a second")
        .expect("outbound channel closed");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_initialize_scenario() {
    let (session, mut outbound) = session();

    let call = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .request("initialize", json!({"clientInfo": {"name": "canopy", "version": "0.1.0"}}))
                .await
        }
    });

    let sent = next_message(&mut outbound).await;
    assert_eq!(sent["jsonrpc"], "2.0");
    assert_eq!(sent["id"], 0);
    assert_eq!(sent["method"], "initialize");
    assert_eq!(session.pending_ids(), vec![RequestId::Number(0)]);

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":0,"result":{"serverInfo":{"name":"srv"}}}"#)
        .unwrap();

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"serverInfo": {"name": "srv"}}));
    assert!(session.pending_ids().is_empty(), "pending entry should be removed");
}

#[tokio::test]
async fn test_remote_error_rejects_request() {
    let (session, mut outbound) = session();
    let call = tokio::spawn({
        let session = session.clone();
        async move { session.request("render", Value::Null).await }
    });

    let sent = next_message(&mut outbound).await;
    let reply = json!({
        "jsonrpc": "2.0",
        "id": sent["id"],
        "result": null,
        "error": {"code": -32002, "message": "not initialized"}
    });
    session.handle_payload(&reply.to_string()).unwrap();

    let err = call.await.unwrap().unwrap_err();
    let remote = err.remote().expect("expected a remote error");
    assert_eq!(remote.code, ErrorCode::ServerNotInitialized);
    assert_eq!(remote.message, "not initialized");
}

#[tokio::test]
async fn test_request_as_decodes_result() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct ServerInfo {
        name: String,
    }

    let (session, mut outbound) = session();
    let call = tokio::spawn({
        let session = session.clone();
        async move { session.request_as::<ServerInfo>("info", Value::Null).await }
    });
    let sent = next_message(&mut outbound).await;
    session
        .handle_payload(&json!({"jsonrpc": "2.0", "id": sent["id"], "result": {"name": "srv"}}).to_string())
        .unwrap();

    assert_eq!(
        call.await.unwrap().unwrap(),
        ServerInfo {
            name: "srv".to_string()
        }
    );
}

#[tokio::test]
async fn test_unknown_method_gets_method_not_found() {
    let (session, mut outbound) = session();
    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":"x1","method":"nope","params":{}}"#)
        .unwrap();

    let reply = next_message(&mut outbound).await;
    assert_eq!(reply["id"], "x1");
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn test_handler_result_and_failure() {
    let (session, mut outbound) = session();
    session.register("double", |params: Value| async move {
        let n = params["n"].as_i64().ok_or_else(|| anyhow::anyhow!("n must be an integer"))?;
        Ok::<_, anyhow::Error>(json!(n * 2))
    });

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":1,"method":"double","params":{"n":21}}"#)
        .unwrap();
    let reply = next_message(&mut outbound).await;
    assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": 42}));

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":2,"method":"double","params":{"n":"x"}}"#)
        .unwrap();
    let reply = next_message(&mut outbound).await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["error"]["code"], -32000);
    assert_eq!(reply["error"]["message"], "n must be an integer");
}

#[tokio::test]
async fn test_handler_response_error_keeps_code() {
    let (session, mut outbound) = session();
    session.register("guarded", |_params: Value| async move {
        let result: anyhow::Result<Value> = Err(ResponseError::new(ErrorCode::Unauthorized, "no ticket")
            .with_data(json!({"retry": false}))
            .into());
        result
    });

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":7,"method":"guarded"}"#)
        .unwrap();
    let reply = next_message(&mut outbound).await;
    assert_eq!(reply["error"]["code"], -32401);
    assert_eq!(reply["error"]["data"], json!({"retry": false}));
}

#[tokio::test]
async fn test_panicking_handler_gets_internal_error() {
    let (session, mut outbound) = session();
    session.register("explode", |params: Value| async move {
        if params["fail"] == true {
            panic!("boom");
        }
        Ok::<_, anyhow::Error>(json!("fine"))
    });

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":7,"method":"explode","params":{"fail":true}}"#)
        .unwrap();
    let reply = next_message(&mut outbound).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32603);
    assert!(reply["error"]["message"].as_str().unwrap().contains("boom"));

    // The id is released, so reusing it is not a duplicate.
    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":7,"method":"explode","params":{"fail":false}}"#)
        .unwrap();
    let reply = next_message(&mut outbound).await;
    assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 7, "result": "fine"}));
}

#[tokio::test]
async fn test_notification_fans_out_then_reaches_handler() {
    let (session, _outbound) = session();
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let hits = hits.clone();
        session.subscribe_notification("event", move |params| {
            assert_eq!(params["handler_id"], "b/onClick");
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    session.register("event", move |params: Value| {
        let tx = tx.lock().unwrap().take();
        async move {
            if let Some(tx) = tx {
                let _ = tx.send(params);
            }
            Ok::<_, anyhow::Error>(Value::Null)
        }
    });

    session
        .handle_payload(r#"{"jsonrpc":"2.0","method":"event","params":{"handler_id":"b/onClick"}}"#)
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2, "both subscribers run synchronously");
    let params = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params["handler_id"], "b/onClick");
}

#[tokio::test]
async fn test_stale_response_is_dropped() {
    let (session, mut outbound) = session();
    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":99,"result":"late"}"#)
        .unwrap();
    assert!(session.pending_ids().is_empty());
    assert!(outbound.try_recv().is_err(), "stale responses are not answered");
}

#[tokio::test]
async fn test_unparsable_payload_reports_parse_error() {
    let (session, mut outbound) = session();
    let err = session.handle_payload("{not json").unwrap_err();
    assert!(matches!(err, RpcError::Parse(_)));

    let reply = next_message(&mut outbound).await;
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"]["code"], -32700);
}

#[tokio::test]
async fn test_unclassifiable_message_is_ignored() {
    let (session, mut outbound) = session();
    session
        .handle_payload(r#"[{"jsonrpc":"2.0","id":1}, 5, "text"]"#)
        .unwrap();
    assert!(outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_peer_cancellation_aborts_handler() {
    let (session, mut outbound) = session();
    let finished = Arc::new(AtomicUsize::new(0));
    session.register("slow", {
        let finished = finished.clone();
        move |_params: Value| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(Value::Null)
            }
        }
    });

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":5,"method":"slow"}"#)
        .unwrap();

    session
        .handle_payload(r#"{"jsonrpc":"2.0","id":5,"method":"slow"}"#)
        .unwrap();
    let duplicate = next_message(&mut outbound).await;
    assert_eq!(duplicate["error"]["code"], -32600);

    session
        .handle_payload(r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":5}}"#)
        .unwrap();
    let cancelled = next_message(&mut outbound).await;
    assert_eq!(cancelled["id"], 5);
    assert_eq!(cancelled["error"]["code"], -32800);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_rejects_pending_and_later_calls() {
    let (session, _outbound) = session();
    let call = tokio::spawn({
        let session = session.clone();
        async move { session.request("render", Value::Null).await }
    });
    while session.pending_ids().is_empty() {
        tokio::task::yield_now().await;
    }

    session.close();
    assert!(matches!(call.await.unwrap(), Err(RpcError::Closed)));
    assert!(matches!(
        session.request("render", Value::Null).await,
        Err(RpcError::Closed)
    ));
    assert!(matches!(session.notify("event", Value::Null), Err(RpcError::Closed)));
}

#[tokio::test]
async fn test_serve_drives_payloads_and_closes() {
    let (session, mut outbound) = session();
    session.register("ping", |_params: Value| async move { Ok::<_, anyhow::Error>(json!("pong")) });

    let payloads = futures::stream::iter(vec![
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string(),
        "garbage".to_string(),
    ]);
    session.serve(payloads).await;

    assert!(session.is_closed());
    let mut codes = Vec::new();
    while let Ok(text) = outbound.try_recv() {
        let reply: Value = serde_json::from_str(&text).unwrap();
        codes.push(reply.get("error").map(|e| e["code"].clone()));
    }
    assert!(codes.contains(&Some(json!(-32700))), "garbage should be answered with a parse error");
}

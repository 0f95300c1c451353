//! Gemini Live provider against a local WebSocket server speaking the same wire format.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use sprechen_core::config::LiveSettings;
use sprechen_core::protocol::{OutboundFrame, ProviderEvent, RealtimeProvider};
use sprechen_providers::{GeminiClient, GeminiLiveProvider};

#[tokio::test]
async fn test_live_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let setup_msg = ws.next().await.unwrap().unwrap();
        let setup: serde_json::Value = serde_json::from_str(setup_msg.to_text().unwrap()).unwrap();

        ws.send(Message::text(r#"{"setupComplete":{}}"#.to_string()))
            .await
            .unwrap();
        let audio = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#;
        ws.send(Message::binary(audio.as_bytes().to_vec()))
            .await
            .unwrap();

        let input_msg = ws.next().await.unwrap().unwrap();
        let input: serde_json::Value = serde_json::from_str(input_msg.to_text().unwrap()).unwrap();

        ws.send(Message::text(
            r#"{"serverContent":{"interrupted":true}}"#.to_string(),
        ))
        .await
        .unwrap();
        ws.close(None).await.ok();
        (setup, input)
    });

    let client = GeminiClient::new("test-key", Some(&format!("http://{addr}")));
    let provider = GeminiLiveProvider::new(client);
    let config = LiveSettings::default().to_live_config();
    let mut connection = provider.connect(&config).await.unwrap();

    assert_eq!(connection.events.recv().await, Some(ProviderEvent::Open));
    match connection.events.recv().await {
        Some(ProviderEvent::Message(message)) => {
            assert_eq!(message.audio.as_deref(), Some("AAAA"));
        }
        other => panic!("expected audio message, got {other:?}"),
    }

    connection
        .outbound
        .send(OutboundFrame {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AQID".into(),
        })
        .unwrap();

    match connection.events.recv().await {
        Some(ProviderEvent::Message(message)) => assert!(message.interrupted),
        other => panic!("expected interruption, got {other:?}"),
    }
    assert_eq!(connection.events.recv().await, Some(ProviderEvent::Close));

    let (setup, input) = server.await.unwrap();
    assert_eq!(setup["setup"]["model"], format!("models/{}", config.model));
    assert_eq!(
        setup["setup"]["systemInstruction"]["parts"][0]["text"],
        config.system_instruction.as_str()
    );
    let chunk = &input["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(chunk["data"], "AQID");
}

#[tokio::test]
async fn test_connect_failure_is_an_error() {
    // Nothing listens on this port once the listener is dropped.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = GeminiClient::new("test-key", Some(&format!("http://{addr}")));
    let provider = GeminiLiveProvider::new(client);
    let result = provider
        .connect(&LiveSettings::default().to_live_config())
        .await;
    assert!(result.is_err());
}

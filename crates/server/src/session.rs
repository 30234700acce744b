//! WebSocket session handling
//!
//! Maps one client connection onto one streaming decoder. Text frames carry
//! the JSON control protocol (`signal: start / end`), binary frames carry
//! little-endian 16-bit PCM. Results flow back through a single-writer
//! queue so partials and the terminal message stay ordered.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};

use myna_core::{pcm16le_to_f32, RecognitionResult};
use myna_pipeline::{DecodeEvent, FeaturePipeline, StreamingDecoder, StreamingDecoderConfig};

use crate::state::AppState;
use crate::ServerError;

/// Inbound control messages
#[derive(Debug, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
enum ClientMessage {
    /// Opens an utterance stream; required before any audio
    Start {
        nbest: Option<usize>,
        continuous_decoding: Option<bool>,
    },
    /// Flushes the current utterance
    End,
}

#[derive(Debug, Serialize)]
struct ResultMessage<'a> {
    status: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    nbest: &'a [RecognitionResult],
}

#[derive(Debug, Serialize)]
struct FailureMessage<'a> {
    status: &'static str,
    message: &'a str,
}

fn result_json(kind: &'static str, nbest: &[RecognitionResult]) -> String {
    serde_json::to_string(&ResultMessage {
        status: "ok",
        kind,
        nbest,
    })
    .unwrap_or_else(|_| r#"{"status":"failed","message":"serialization error"}"#.to_string())
}

fn failure_json(message: &str) -> String {
    serde_json::to_string(&FailureMessage {
        status: "failed",
        message,
    })
    .unwrap_or_else(|_| r#"{"status":"failed","message":"serialization error"}"#.to_string())
}

/// One in-flight utterance stream: the feature pipeline fed by the
/// transport task and the blocking decode worker draining it.
struct Utterance {
    features: Arc<FeaturePipeline>,
    stop: Arc<AtomicBool>,
    worker: tokio::task::JoinHandle<()>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl Utterance {
    fn start(
        state: &AppState,
        session_id: &str,
        nbest: Option<usize>,
        continuous_decoding: Option<bool>,
        out_tx: UnboundedSender<Message>,
    ) -> Self {
        let mut settings = (*state.settings).clone();
        if let Some(n) = nbest {
            settings.decode.nbest = n.clamp(1, settings.decode.beam_size);
        }
        if let Some(c) = continuous_decoding {
            settings.decode.continuous_decoding = c;
        }

        let features = Arc::new(FeaturePipeline::new(&settings.feature));
        let stop = Arc::new(AtomicBool::new(false));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let config = StreamingDecoderConfig::from_settings(
            &settings,
            state.executor.metadata().subsampling_rate,
        );
        let mut decoder = StreamingDecoder::new(
            state.executor.clone(),
            features.clone(),
            state.dict.clone(),
            state.context_graph.clone(),
            config,
            stop.clone(),
            event_tx,
        );

        tracing::info!(
            session_id = %session_id,
            nbest = settings.decode.nbest,
            continuous = settings.decode.continuous_decoding,
            "Utterance stream opened"
        );

        // The decode loop blocks on the feature pipeline; keep it off the
        // async runtime.
        let worker = tokio::task::spawn_blocking(move || decoder.run());

        let forwarder = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let json = match &event {
                    DecodeEvent::Partial(nbest) => result_json("partial_result", nbest),
                    DecodeEvent::Final(nbest) => result_json("final_result", nbest),
                    DecodeEvent::Failed(message) => failure_json(message),
                };
                if out_tx.send(Message::Text(json)).is_err() {
                    break;
                }
            }
        });

        Self {
            features,
            stop,
            worker,
            forwarder,
        }
    }

    fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Cancel without a final result (client went away).
    fn cancel(self) {
        self.stop.store(true, Ordering::Release);
        self.features.cancel();
        self.forwarder.abort();
    }
}

/// WebSocket handler mapping a connection onto a session
pub struct SessionHandler;

impl SessionHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, "Session connected");

        let (mut sender, mut receiver) = socket.split();

        // Single-writer queue: every task publishes through out_tx
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let mut utterance: Option<Utterance> = None;

        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Start {
                        nbest,
                        continuous_decoding,
                    }) => {
                        match &utterance {
                            Some(current) if !current.is_finished() => {
                                let err = ServerError::Session(
                                    "recognition already started".to_string(),
                                );
                                let _ = out_tx.send(Message::Text(failure_json(&err.to_string())));
                                continue;
                            }
                            _ => {}
                        }
                        utterance = Some(Utterance::start(
                            &state,
                            &session_id,
                            nbest,
                            continuous_decoding,
                            out_tx.clone(),
                        ));
                    }
                    Ok(ClientMessage::End) => match &utterance {
                        Some(current) => current.features.set_input_finished(),
                        None => {
                            let err =
                                ServerError::Session("recognition not started".to_string());
                            let _ = out_tx.send(Message::Text(failure_json(&err.to_string())));
                        }
                    },
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Bad control message");
                        let err = ServerError::InvalidRequest(e.to_string());
                        let _ = out_tx.send(Message::Text(failure_json(&err.to_string())));
                    }
                },
                Ok(Message::Binary(data)) => match &utterance {
                    Some(current) => {
                        current.features.accept_waveform(&pcm16le_to_f32(&data));
                    }
                    None => {
                        let err =
                            ServerError::Session("start signal required first".to_string());
                        let _ = out_tx.send(Message::Text(failure_json(&err.to_string())));
                    }
                },
                Ok(Message::Ping(payload)) => {
                    let _ = out_tx.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }

        // Disconnect: unwind the decoder without emitting a final
        if let Some(current) = utterance.take() {
            current.cancel();
        }
        drop(out_tx);
        let _ = writer.await;

        tracing::info!(session_id = %session_id, "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myna_core::WordPiece;

    #[test]
    fn test_parse_start() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"signal":"start","nbest":3,"continuous_decoding":true}"#)
                .unwrap();
        match msg {
            ClientMessage::Start {
                nbest,
                continuous_decoding,
            } => {
                assert_eq!(nbest, Some(3));
                assert_eq!(continuous_decoding, Some(true));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_parse_start_minimal() {
        let msg: ClientMessage = serde_json::from_str(r#"{"signal":"start"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Start {
                nbest: None,
                continuous_decoding: None
            }
        ));
    }

    #[test]
    fn test_parse_end() {
        let msg: ClientMessage = serde_json::from_str(r#"{"signal":"end"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::End));
    }

    #[test]
    fn test_reject_unknown_signal() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"signal":"bogus"}"#).is_err());
    }

    #[test]
    fn test_result_message_shape() {
        let nbest = vec![RecognitionResult {
            sentence: "hello world".to_string(),
            score: -2.5,
            word_pieces: vec![WordPiece {
                word: "hello".to_string(),
                start: 0,
                end: 480,
            }],
        }];
        let json = result_json("partial_result", &nbest);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["type"], "partial_result");
        assert_eq!(value["nbest"][0]["sentence"], "hello world");
        assert_eq!(value["nbest"][0]["word_pieces"][0]["word"], "hello");
        assert_eq!(value["nbest"][0]["word_pieces"][0]["start"], 0);
    }

    #[test]
    fn test_failure_message_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&failure_json("model exploded")).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["message"], "model exploded");
    }
}

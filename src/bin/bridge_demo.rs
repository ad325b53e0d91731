use anyhow::{Result, bail};
use bidi_bridge::codec::{self, MalformedRecord, RecordAux};
use bidi_bridge::protocol::Protocol;
use bidi_bridge::transport::{
    EchoService, GrpcTransport, HandlerRegistry, LocalTransport, StreamTransport,
};
use bidi_bridge::{Bridge, BridgeConfig, CallHandle, CallObserver, ErrorCode, OwnedBuffer, Variant};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const MESSAGES: [&str; 3] = ["X", "Y", "Z"];

enum Event {
    Response(String),
    Done(ErrorCode),
}

struct Printer {
    variant: Variant,
    events: mpsc::UnboundedSender<Event>,
}

impl CallObserver for Printer {
    fn on_response(&self, _handle: CallHandle, message: Result<OwnedBuffer, MalformedRecord>) {
        let text = match message {
            Ok(buffer) => {
                let payload = match self.variant {
                    Variant::Framed => codec::decode_payload(&buffer).unwrap_or_default(),
                    Variant::Native => buffer.into_bytes(),
                };
                String::from_utf8_lossy(&payload).into_owned()
            }
            Err(e) => format!("<{e}>"),
        };
        let _ = self.events.send(Event::Response(text));
    }

    fn on_done(&self, _handle: CallHandle, code: ErrorCode) {
        let _ = self.events.send(Event::Done(code));
    }
}

async fn run_call(bridge: &Bridge, variant: Variant) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = bridge
        .start(variant, Arc::new(Printer { variant, events: tx }))
        .await?;
    println!("[{variant:?}] started call {handle}");

    for (sequence, msg) in MESSAGES.iter().enumerate() {
        let sequence = i32::try_from(sequence)?;
        match variant {
            Variant::Framed => {
                let aux = RecordAux {
                    sequence,
                    repeat: 0,
                };
                let record = codec::encode_record(msg.as_bytes(), aux);
                bridge.send(handle, &record)?;
            }
            Variant::Native => bridge.send_native(handle, msg.as_bytes(), sequence)?,
        }
    }
    bridge.close_send(handle)?;

    let mut received = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            Event::Response(text) => {
                println!("[{variant:?}] <- {text}");
                received.push(text);
            }
            Event::Done(code) => {
                println!("[{variant:?}] done: {code}");
                if !code.is_ok() {
                    bail!("call {handle} ended with {code}");
                }
                break;
            }
        }
    }

    let expected: Vec<String> = MESSAGES.iter().map(|m| format!("echo:{m}")).collect();
    if received != expected {
        bail!("unexpected responses: {received:?}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let transport: Arc<dyn StreamTransport> = match std::env::var("BRIDGE_ENDPOINT") {
        Ok(endpoint) => {
            println!("Bridging to remote server at {endpoint}");
            Arc::new(GrpcTransport::connect_lazy(endpoint)?)
        }
        Err(_) => {
            println!("Bridging to in-process echo service");
            let handlers = Arc::new(HandlerRegistry::new());
            handlers.register(Protocol::Grpc, BridgeConfig::default().service, EchoService)?;
            Arc::new(LocalTransport::new(handlers))
        }
    };

    let bridge = Bridge::new(BridgeConfig::default(), transport, Handle::current());

    run_call(&bridge, Variant::Framed).await?;
    run_call(&bridge, Variant::Native).await?;

    println!("All calls complete");
    Ok(())
}

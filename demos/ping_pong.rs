/**
# Besides of `notnets_rs` the example requires following dependencies:
tokio =  { version = "^1", features = ["macros"] }
log = "^0"
env_logger = "^0" # to print logs
 */
use log::{error, info};
use notnets_rs::handler::{HandlerResult, IncomingRequest, Reply, RequestHandler};
use notnets_rs::messages::RawMessage;
use notnets_rs::shm::memory::MemoryProvider;
use notnets_rs::status::{Code, Status};
use notnets_rs::{
    CallContext, CallOptions, Capture, Config, Dialer, NotnetsServer, ServerContext, UnaryChannel,
};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    env_logger::init();
    if let Err(err) = run().await {
        error!("Failure: {:?}", err);
        return Err(err);
    }
    Ok(())
}

async fn run() -> Result<(), Error> {
    let provider = Arc::new(MemoryProvider::global());

    let server = Arc::new(NotnetsServer::new(Config::default()));
    server.register("/Ping/Pong", PongHandler::default()).await?;
    let context = ServerContext::register(provider.clone(), "server")?;
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(context).await }
    });

    let channel = Dialer::new(Arc::new(Config::default()), provider)
        .dial("client", "server")
        .await?;
    info!("Sending 3 requests");
    for _ in 0..3 {
        let mut context = CallContext::new().with_timeout(Duration::from_secs(1));
        context.metadata_mut().insert("greeting", "Marco");
        let mut options = CallOptions::new().with_capture(Capture::TRAILERS);
        let request = RawMessage::from(b"Ping!".to_vec());
        let response: Result<RawMessage, _> = channel
            .invoke(&context, "/Ping/Pong", &request, &mut options)
            .await;
        match response {
            Ok(response) => info!("Response: {} ({:?})", response, options.trailers()),
            Err(error) => info!("Fail: {}", error),
        }
    }
    channel.close()?;

    server.shutdown();
    serving.await??;
    Ok(())
}

#[derive(Debug, Default)]
struct PongHandler {
    counter: u32,
}

impl RequestHandler for PongHandler {
    type REQ = RawMessage;
    type RES = RawMessage;

    fn handle(&mut self, request: IncomingRequest<RawMessage>) -> HandlerResult<Reply<RawMessage>> {
        info!("Received {:?}", request);
        self.counter.add_assign(1);
        if request.metadata().get_str("greeting") != Some("Marco") {
            return Err(Status::invalid_argument("Bad greeting"));
        }
        match self.counter {
            1 => Ok(msg("Pong!")),
            2 => Ok(msg("I feel bad ...")),
            _ => Err(Status::new(Code::Unavailable, "I feel sick ...".to_string())),
        }
    }
}

fn msg(msg: &'static str) -> Reply<RawMessage> {
    Reply::new(RawMessage::from(msg.as_bytes())).with_trailer("greeting", "Polo")
}

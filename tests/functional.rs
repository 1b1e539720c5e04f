#[cfg(test)]
#[macro_use]
extern crate log;
#[macro_use]
extern crate serial_test;

use bytes::Bytes;
use futures::future::join_all;
use futures::Future;
use notnets_rs::errors::NotnetsError;
use notnets_rs::frames::headers::Headers;
use notnets_rs::frames::RequestEnvelope;
use notnets_rs::handler::{
    HandlerResult, IncomingRequest, Reply, RequestHandler, RequestHandlerAsync,
};
use notnets_rs::messages::RawMessage;
use notnets_rs::shm::memory::MemoryProvider;
use notnets_rs::shm::ShmProvider;
use notnets_rs::status::{Code, Status};
use notnets_rs::{
    CallContext, CallOptions, Capture, ChannelPool, Config, ConfigBuilder, Dialer, Framing,
    NResult, NotnetsServer, PerRpcCredentials, ServerConnection, ServerContext, UnaryChannel,
};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;
use tokio::task::JoinHandle;

const SERVER: &str = "srv-echo";
const CLIENT: &str = "client-echo";
const ECHO: &str = "/Echo/Say";
const SLOW_ECHO: &str = "/Slow/Echo";

#[tokio::test]
#[serial]
async fn end_to_end_scenario() -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let config = Config::default();
    let context = ServerContext::register(provider.clone(), SERVER)?;
    let dialer = Dialer::new(Arc::new(config.clone()), provider);

    // WHEN
    let client = tokio::spawn(async move {
        let channel = dialer.dial(CLIENT, SERVER).await?;
        let mut call_context = CallContext::new();
        call_context
            .metadata_mut()
            .insert("trace-bin", Bytes::from_static(&[0xAB, 0xCD]));
        let mut options = CallOptions::new().with_capture(Capture::TRAILERS);
        let request = RawMessage::from(vec![0x01, 0x02, 0x03]);
        let response: RawMessage = channel
            .invoke(&call_context, "/Service/Method", &request, &mut options)
            .await?;
        channel.close()?;
        Ok::<_, NotnetsError>((response, options))
    });
    let connection = loop {
        match context.accept() {
            Some(connection) => break connection,
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
    };
    let connection = ServerConnection::new(connection, &config);
    let call = connection
        .next_call()
        .await?
        .ok_or_else(|| anyhow::anyhow!("client went away"))?;
    connection
        .reply(Reply::new(RawMessage::from(vec![0x09])).with_trailer("result", "ok"))
        .await?;
    let (response, options) = client.await??;

    // THEN
    assert_eq!("/Service/Method", call.method().as_str());
    assert_eq!(&Bytes::from_static(&[0x01, 0x02, 0x03]), call.payload());
    assert_eq!(
        Some(&Bytes::from_static(&[0xAB, 0xCD])),
        call.metadata().get("trace-bin")
    );
    assert_eq!(&Bytes::from_static(&[0x09]), response.body());
    assert_eq!(Some("ok"), options.trailers().get_str("result"));
    assert!(!options.trailers().contains_key("grpc-status"));
    assert!(connection.next_call().await?.is_none(), "client should be gone");
    context.shutdown();
    Ok(())
}

#[test_case(0;    "Empty body")]
#[test_case(3;    "Tiny body")]
#[test_case(100;  "Short body")]
#[test_case(1000; "Body spanning chunks")]
#[test_case(5000; "Body spanning many chunks")]
#[tokio::test]
#[serial]
async fn echo_short_read_framing(body_len: usize) -> Result<(), anyhow::Error> {
    let config = ConfigBuilder::default().chunk_size(64).build()?;
    let request_len = rendered_request_len(body_len);
    assert_ne!(0, request_len % 64, "request must not fill whole chunks");
    echo_test(config, body_len).await
}

#[test_case(0;         "Empty body")]
#[test_case(64;        "One chunk body")]
#[test_case(64 * 40;   "Whole chunks body")]
#[test_case(100_000;   "Large body")]
#[serial]
#[tokio::test]
async fn echo_length_prefixed_framing(body_len: usize) -> Result<(), anyhow::Error> {
    let config = ConfigBuilder::default()
        .chunk_size(64)
        .framing(Framing::LengthPrefixed)
        .build()?;
    echo_test(config, body_len).await
}

async fn echo_test(config: Config, body_len: usize) -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let (server, serving) = start_server(provider.clone(), config.clone()).await?;
    let body: Vec<u8> = (0..body_len).map(|i| (i % 251) as u8).collect();
    let request = RawMessage::from(body);

    // WHEN
    let channel = Dialer::new(Arc::new(config), provider)
        .dial(CLIENT, SERVER)
        .await?;
    let response: RawMessage = channel
        .invoke(&CallContext::new(), ECHO, &request, &mut CallOptions::new())
        .await?;
    channel.close()?;
    stop_server(server, serving).await?;

    // THEN
    assert_eq!(request.body(), response.body(), "Body should match");
    Ok(())
}

#[tokio::test]
#[serial]
async fn calls_reuse_channel() -> Result<(), anyhow::Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let (server, serving) = start_server(provider.clone(), Config::default()).await?;
    let channel = Dialer::new(Arc::new(Config::default()), provider)
        .dial(CLIENT, SERVER)
        .await?;

    for i in 0..5u8 {
        let request = RawMessage::from(vec![i; 10]);
        let response: RawMessage = channel
            .invoke(&CallContext::new(), ECHO, &request, &mut CallOptions::new())
            .await?;
        assert_eq!(request, response);
    }

    channel.close()?;
    stop_server(server, serving).await
}

#[tokio::test]
#[serial]
async fn abandoned_call_breaks_channel() -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let config = ConfigBuilder::default()
        .chunk_size(32)
        .framing(Framing::LengthPrefixed)
        .build()?;
    let (server, serving) = start_server(provider.clone(), config.clone()).await?;
    let channel = Dialer::new(Arc::new(config), provider)
        .dial(CLIENT, SERVER)
        .await?;
    let slow = RawMessage::from(vec![b'A'; 200]);

    // WHEN
    let abandoned: Result<NResult<RawMessage>, _> = tokio::time::timeout(
        Duration::from_millis(50),
        channel.invoke(&CallContext::new(), SLOW_ECHO, &slow, &mut CallOptions::new()),
    )
    .await;
    let next: NResult<RawMessage> = channel
        .invoke(
            &CallContext::new(),
            ECHO,
            &RawMessage::from(b"BBBBB".to_vec()),
            &mut CallOptions::new(),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let broken = channel.is_broken();
    channel.close()?;
    stop_server(server, serving).await?;

    // THEN
    assert!(abandoned.is_err(), "Slow call should time out");
    assert!(broken, "Channel should be marked broken");
    match next {
        Err(NotnetsError::ConnectionError(_)) => {}
        other => panic!("Expected broken channel error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
#[serial]
async fn oversized_request_gets_status() -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let server_config = ConfigBuilder::default().max_message_size(300).build()?;
    let (server, serving) = start_server(provider.clone(), server_config).await?;
    let channel = Dialer::new(Arc::new(Config::default()), provider)
        .dial(CLIENT, SERVER)
        .await?;
    let small = RawMessage::from(vec![7u8; 10]);

    // WHEN
    let rejected: NResult<RawMessage> = tokio::time::timeout(
        Duration::from_secs(5),
        channel.invoke(
            &CallContext::new(),
            ECHO,
            &RawMessage::from(vec![1u8; 1000]),
            &mut CallOptions::new(),
        ),
    )
    .await?;
    let accepted: RawMessage = channel
        .invoke(&CallContext::new(), ECHO, &small, &mut CallOptions::new())
        .await?;
    channel.close()?;
    stop_server(server, serving).await?;

    // THEN
    match rejected {
        Err(NotnetsError::Status(status)) => assert_eq!(Code::ResourceExhausted, status.code()),
        other => panic!("Expected resource exhausted status, got {:?}", other),
    }
    assert_eq!(small, accepted);
    Ok(())
}

#[tokio::test]
#[serial]
async fn handler_status_reaches_caller() -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let (server, serving) = start_server(provider.clone(), Config::default()).await?;
    let channel = Dialer::new(Arc::new(Config::default()), provider)
        .dial(CLIENT, SERVER)
        .await?;

    // WHEN
    let failed: NResult<RawMessage> = channel
        .invoke(
            &CallContext::new(),
            "/Rate/GetRates",
            &RawMessage::from(b"h-1".to_vec()),
            &mut CallOptions::new(),
        )
        .await;
    let unknown: NResult<RawMessage> = channel
        .invoke(
            &CallContext::new(),
            "/Rate/Missing",
            &RawMessage::default(),
            &mut CallOptions::new(),
        )
        .await;
    channel.close()?;
    stop_server(server, serving).await?;

    // THEN
    assert_eq!(
        Err(NotnetsError::Status(Status::new(
            Code::NotFound,
            "no rates for h-1".to_string()
        ))),
        failed
    );
    match unknown {
        Err(NotnetsError::Status(status)) => assert_eq!(Code::Unimplemented, status.code()),
        other => panic!("Expected unimplemented status, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
#[serial]
async fn metadata_deadline_and_credentials() -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let (server, serving) = start_server(provider.clone(), Config::default()).await?;
    let channel = Dialer::new(Arc::new(Config::default()), provider)
        .dial(CLIENT, SERVER)
        .await?;
    let mut context = CallContext::new().with_timeout(Duration::from_secs(10));
    context.metadata_mut().insert("user", "ann");
    let mut options = CallOptions::new()
        .with_credentials(BearerToken("t0k3n"))
        .with_capture(Capture::HEADERS | Capture::TRAILERS);

    // WHEN
    let response: RawMessage = channel
        .invoke(&context, "/Meta/Inspect", &RawMessage::default(), &mut options)
        .await?;
    channel.close()?;
    stop_server(server, serving).await?;

    // THEN
    assert!(response.body().is_empty());
    assert_eq!(Some("ann"), options.headers().get_str("seen-user"));
    assert_eq!(
        Some("Bearer t0k3n"),
        options.headers().get_str("seen-authorization")
    );
    assert_eq!(
        Some("shm://srv-echo/Meta/Inspect"),
        options.headers().get_str("seen-uri")
    );
    let timeout_ms: u64 = options
        .trailers()
        .get_str("timeout-ms")
        .ok_or_else(|| anyhow::anyhow!("missing timeout trailer"))?
        .parse()?;
    assert!(timeout_ms > 0 && timeout_ms <= 10_000);
    Ok(())
}

#[tokio::test]
#[serial]
async fn canceled_context_skips_call() -> Result<(), anyhow::Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let context = ServerContext::register(provider.clone(), SERVER)?;
    let channel = Dialer::new(Arc::new(Config::default()), provider)
        .dial(CLIENT, SERVER)
        .await?;
    let call_context = CallContext::new();
    call_context.cancel();

    let canceled: NResult<RawMessage> = channel
        .invoke(&call_context, ECHO, &RawMessage::default(), &mut CallOptions::new())
        .await;
    let expired: NResult<RawMessage> = channel
        .invoke(
            &CallContext::new().with_timeout(Duration::ZERO),
            ECHO,
            &RawMessage::default(),
            &mut CallOptions::new(),
        )
        .await;

    assert_eq!(Err(NotnetsError::Canceled), canceled);
    assert_eq!(Err(NotnetsError::DeadlineExceeded), expired);
    assert!(context.accept().is_some(), "queue pair should be attached");
    channel.close()?;
    context.shutdown();
    Ok(())
}

#[tokio::test]
#[serial]
async fn pool_runs_calls_in_parallel() -> Result<(), anyhow::Error> {
    // GIVEN
    let _ = env_logger::builder().is_test(true).try_init();
    let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
    let config = ConfigBuilder::default().max_connections(3).build()?;
    let (server, serving) = start_server(provider.clone(), config.clone()).await?;
    let dialer = Dialer::new(Arc::new(config.clone()), provider);
    let pool = ChannelPool::new(dialer, &config, CLIENT, SERVER).await?;

    // WHEN
    let calls = (0..8u8).map(|i| {
        let pool = &pool;
        async move {
            let request = RawMessage::from(vec![i; 32]);
            let response: RawMessage = pool
                .invoke(&CallContext::new(), ECHO, &request, &mut CallOptions::new())
                .await?;
            Ok::<_, NotnetsError>((request, response))
        }
    });
    let results = join_all(calls).await;
    let connections = pool.state().connections;
    drop(pool);
    stop_server(server, serving).await?;

    // THEN
    for result in results {
        let (request, response) = result?;
        assert_eq!(request, response);
    }
    assert!(connections >= 1 && connections <= 3);
    Ok(())
}

// Utils

async fn start_server(
    provider: Arc<dyn ShmProvider>,
    config: Config,
) -> NResult<(Arc<NotnetsServer>, JoinHandle<NResult<()>>)> {
    let server = Arc::new(NotnetsServer::new(config));
    server.register(ECHO, EchoHandler {}).await?;
    server.register("/Rate/GetRates", MissingRatesHandler {}).await?;
    server.register_async("/Meta/Inspect", InspectHandler {}).await?;
    server.register_async(SLOW_ECHO, SlowEchoHandler {}).await?;
    let context = ServerContext::register(provider, SERVER)?;
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(context).await }
    });
    Ok((server, serving))
}

async fn stop_server(
    server: Arc<NotnetsServer>,
    serving: JoinHandle<NResult<()>>,
) -> Result<(), anyhow::Error> {
    server.shutdown();
    serving.await??;
    Ok(())
}

fn rendered_request_len(body_len: usize) -> usize {
    let mut headers = Headers::new();
    headers.set("content-type", "application/octet-stream");
    let body = Bytes::from(vec![0u8; body_len]);
    RequestEnvelope::for_call(ECHO, SERVER, headers, body)
        .render()
        .map(|rendered| rendered.len())
        .unwrap_or_default()
}

#[derive(Debug)]
struct EchoHandler {}

impl RequestHandler for EchoHandler {
    type REQ = RawMessage;
    type RES = RawMessage;
    fn handle(&mut self, request: IncomingRequest<RawMessage>) -> HandlerResult<Reply<RawMessage>> {
        debug!("Incoming body len {}", request.message().body().len());
        Ok(Reply::new(request.into_message()))
    }
}

#[derive(Debug)]
struct MissingRatesHandler {}

impl RequestHandler for MissingRatesHandler {
    type REQ = RawMessage;
    type RES = RawMessage;
    fn handle(&mut self, request: IncomingRequest<RawMessage>) -> HandlerResult<Reply<RawMessage>> {
        let hotel = String::from_utf8_lossy(request.message().body()).into_owned();
        Err(Status::new(Code::NotFound, format!("no rates for {}", hotel)))
    }
}

#[derive(Debug)]
struct InspectHandler {}

impl RequestHandlerAsync for InspectHandler {
    type REQ = RawMessage;
    type RES = RawMessage;
    fn handle(
        &mut self,
        request: IncomingRequest<RawMessage>,
    ) -> Pin<Box<dyn Future<Output = HandlerResult<Reply<RawMessage>>> + Send + '_>> {
        Box::pin(async move {
            let mut reply = Reply::new(RawMessage::default());
            for key in ["user", "authorization", "uri"] {
                if let Some(value) = request.metadata().get(key) {
                    reply = reply.with_header(format!("seen-{}", key), value.clone());
                }
            }
            if let Some(timeout) = request.timeout() {
                reply = reply.with_trailer("timeout-ms", timeout.as_millis().to_string());
            }
            Ok(reply)
        })
    }
}

#[derive(Debug)]
struct SlowEchoHandler {}

impl RequestHandlerAsync for SlowEchoHandler {
    type REQ = RawMessage;
    type RES = RawMessage;
    fn handle(
        &mut self,
        request: IncomingRequest<RawMessage>,
    ) -> Pin<Box<dyn Future<Output = HandlerResult<Reply<RawMessage>>> + Send + '_>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Reply::new(request.into_message()))
        })
    }
}

#[derive(Debug)]
struct BearerToken(&'static str);

#[async_trait::async_trait]
impl PerRpcCredentials for BearerToken {
    async fn request_metadata(&self, uri: &str) -> NResult<notnets_rs::metadata::Metadata> {
        let mut metadata = notnets_rs::metadata::Metadata::new();
        metadata.insert("authorization", format!("Bearer {}", self.0));
        metadata.insert("uri", uri.to_string());
        Ok(metadata)
    }
}

//! # sockroute
//!
//! Method/path routed request-response calls multiplexed over one socket event.
//!
//! An [`Api`] owns the schema root shared by both sides. Servers register
//! handlers in a [`RouteTable`] and answer calls through a [`Dispatcher`];
//! clients call routes through an [`Endpoint`] over any [`Transport`].
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use sockroute::{handler_fn, Api, Reply};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Api::from_yaml(&[r#"
//! package: app
//! messages:
//!   - name: Greeting
//!     fields:
//!       - { name: text, id: 1, type: string }
//! "#])?;
//!
//! let routes = api.router().get(
//!     "hello",
//!     handler_fn(|_payload: Value| async move {
//!         Ok(Reply::message(".app.Greeting", json!({ "text": "hi" })))
//!     }),
//! );
//!
//! let endpoint = api.local(routes);
//! let reply = endpoint.get("/hello", None, Value::Null).await?;
//! assert_eq!(reply.unwrap().data, json!({ "text": "hi" }));
//! # Ok(())
//! # }
//! ```

pub mod local;

pub use local::LocalTransport;
pub use sockroute_client::{
    CallError, Connection, ConnectionConfig, Endpoint, Transport, TransportError,
};
pub use sockroute_protocol::{
    ApiCall, ApiError, ApiResponse, CallData, CodecError, Message, Method, ProtocolError,
    ResponseData, SchemaRoot, SchemaSource, API_EVENT,
};
pub use sockroute_server::{
    described, handler_fn, ApiConfig, Config, ConfigError, DispatchError, Dispatcher, Handler,
    HandlerError, HandlerFuture, HandlerNode, HandlerResult, Reply, RouteDescription, RouteTable,
    Server, ServerConfig, ServerError,
};

use std::sync::Arc;

/// Entry point tying one schema root and event name to routers, servers and endpoints.
#[derive(Debug, Clone)]
pub struct Api {
    schemas: Arc<SchemaRoot>,
    event: String,
}

impl Api {
    pub fn new(sources: impl IntoIterator<Item = SchemaSource>) -> Result<Self, CodecError> {
        Ok(Self::with_schemas(Arc::new(SchemaRoot::new(sources)?)))
    }

    /// Builds the schema root from YAML schema documents.
    pub fn from_yaml(sources: &[&str]) -> Result<Self, CodecError> {
        Ok(Self::with_schemas(Arc::new(SchemaRoot::from_yaml_sources(
            sources,
        )?)))
    }

    /// Loads the configured schema files and takes over the configured event.
    pub fn from_config(config: &ApiConfig) -> Result<Self, ConfigError> {
        let schemas = config.load_schemas()?;
        tracing::info!(
            "Loaded {} message types from {} schema files",
            schemas.len(),
            config.schema_files.len()
        );
        Ok(Self::with_schemas(Arc::new(schemas)).with_event(config.event.clone()))
    }

    pub fn with_schemas(schemas: Arc<SchemaRoot>) -> Self {
        Self {
            schemas,
            event: API_EVENT.to_string(),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn schemas(&self) -> &Arc<SchemaRoot> {
        &self.schemas
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// An empty route table.
    pub fn router(&self) -> RouteTable {
        RouteTable::new()
    }

    /// Freezes `table` into a dispatcher sharing this schema root.
    pub fn dispatcher(&self, table: RouteTable) -> Dispatcher {
        Dispatcher::new(table, self.schemas.clone())
    }

    /// A TCP server for `table`, listening on this API's event.
    pub fn server(&self, config: ServerConfig, table: RouteTable) -> Server {
        Server::new(config.with_event(self.event.clone()), self.dispatcher(table))
    }

    /// An endpoint over an arbitrary transport.
    pub fn endpoint<T: Transport>(&self, transport: T) -> Endpoint<T> {
        Endpoint::new(transport, self.schemas.clone()).with_event(self.event.clone())
    }

    /// An endpoint calling `table` in this process.
    pub fn local(&self, table: RouteTable) -> Endpoint<LocalTransport> {
        let transport = LocalTransport::new(self.dispatcher(table)).with_event(self.event.clone());
        self.endpoint(transport)
    }

    /// Connects to a server and returns an endpoint over the connection.
    pub async fn connect(
        &self,
        config: ConnectionConfig,
    ) -> Result<Endpoint<Arc<Connection>>, TransportError> {
        let config = config.with_event(self.event.clone());
        let connection = Connection::open(config, self.schemas.clone()).await?;
        Ok(self.endpoint(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tracing_subscriber::EnvFilter;

    const APP_SCHEMA: &str = r#"
package: app
messages:
  - name: SomeMessage
    fields:
      - { name: a, id: 1, type: string }
      - { name: b, id: 2, type: int32 }
  - name: SomeResponse
    fields:
      - { name: c, id: 1, type: string }
  - name: Rejection
    fields:
      - { name: why, id: 1, type: string, required: true }
"#;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    fn api() -> Api {
        init_tracing();
        Api::from_yaml(&[APP_SCHEMA]).unwrap()
    }

    fn respond(c: &'static str) -> impl Handler {
        handler_fn(move |_payload: Value| async move {
            Ok(Reply::message(".app.SomeResponse", json!({ "c": c })))
        })
    }

    fn echo() -> impl Handler {
        handler_fn(|payload: Value| async move {
            let a = payload["a"].as_str().unwrap_or_default().to_string();
            let b = payload["b"].as_i64().unwrap_or_default();
            Ok(Reply::message(
                ".app.SomeResponse",
                json!({ "c": format!("{}:{}", a, b) }),
            ))
        })
    }

    fn reject() -> impl Handler {
        handler_fn(|_payload: Value| async move {
            Err(HandlerError::declared(".app.Rejection", json!({ "why": "closed" })))
        })
    }

    fn explode() -> impl Handler {
        handler_fn(|_payload: Value| async move {
            Err(HandlerError::fault("database password is hunter2"))
        })
    }

    #[tokio::test]
    async fn test_get_resource() {
        let api = api();
        let endpoint = api.local(api.router().get("/resource", respond("x")));

        let reply = endpoint.get("/resource", None, Value::Null).await.unwrap();
        assert_eq!(
            reply,
            Some(Message::new(".app.SomeResponse", json!({ "c": "x" })))
        );
    }

    #[tokio::test]
    async fn test_payload_reaches_handler() {
        let api = api();
        let endpoint = api.local(api.router().post("echo", echo()));

        let reply = endpoint
            .post("echo", Some(".app.SomeMessage"), json!({ "a": "n", "b": 7 }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.data, json!({ "c": "n:7" }));
    }

    #[tokio::test]
    async fn test_nested_chains_do_not_collide() {
        let api = api();
        let chain = || RouteTable::new().get("b", respond("chain"));
        let deep_first = api
            .router()
            .get("a/b/c", respond("deep"))
            .route(Method::Get, "a", chain());
        let chain_first = api
            .router()
            .route(Method::Get, "a", chain())
            .get("a/b/c", respond("deep"));

        for table in [deep_first, chain_first] {
            let endpoint = api.local(table);
            let at = |path: &'static str| {
                let endpoint = &endpoint;
                async move {
                    endpoint
                        .get(path, None, Value::Null)
                        .await
                        .unwrap()
                        .unwrap()
                        .data
                }
            };
            assert_eq!(at("/a/b").await, json!({ "c": "chain" }));
            assert_eq!(at("/a/b/c").await, json!({ "c": "deep" }));
        }
    }

    #[tokio::test]
    async fn test_method_mismatch_is_not_found() {
        let api = api();
        let endpoint = api.local(api.router().post("/resource", respond("x")));

        let err = endpoint.get("/resource", None, Value::Null).await.unwrap_err();
        let api_error = err.api_error().unwrap();
        assert_eq!(api_error.code, 404);
        assert_eq!(
            api_error.description,
            "Could not find a get handler for path /resource."
        );
    }

    #[tokio::test]
    async fn test_shadowed_registration_never_runs() {
        let api = api();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let counter = second_calls.clone();
        let table = api.router().get("dup", respond("first")).get(
            "dup",
            handler_fn(move |_payload: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Reply::Empty) }
            }),
        );
        let endpoint = api.local(table);

        for _ in 0..3 {
            let reply = endpoint.get("/dup", None, Value::Null).await.unwrap().unwrap();
            assert_eq!(reply.data, json!({ "c": "first" }));
        }
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_three_failure_tiers() {
        let api = api();
        let table = api.router().put("reject", reject()).put("explode", explode());
        let endpoint = api.local(table);

        let declared = endpoint.put("reject", None, Value::Null).await.unwrap_err();
        assert!(declared.api_error().is_none());
        assert_eq!(
            declared.message().unwrap(),
            &Message::new(".app.Rejection", json!({ "why": "closed" }))
        );

        let fault = endpoint.put("explode", None, Value::Null).await.unwrap_err();
        let api_error = fault.api_error().unwrap();
        assert_eq!(api_error.code, 500);
        assert_eq!(api_error.reason, "Internal Server Error");
        assert!(!api_error.description.contains("hunter2"));

        let other_event = api.local(api.router()).with_event("#elsewhere");
        let missing = other_event.get("/", None, Value::Null).await.unwrap_err();
        assert_eq!(missing.api_error().unwrap().code, 404);
    }

    #[tokio::test]
    async fn test_bad_request_payload() {
        let api = api();
        let endpoint = api.local(api.router().post("echo", echo()));
        let transport = endpoint.transport();

        let call = CallData::new(Method::Post, "/echo")
            .with_payload(".app.SomeMessage", vec![0x0A, 0xFF].into());
        let response = transport.emit(API_EVENT, call).await.unwrap();
        assert!(response.is_error);
        let message = response.message(api.schemas()).unwrap().unwrap();
        assert_eq!(ApiError::from_message(&message).unwrap().code, 400);
    }

    #[tokio::test]
    async fn test_from_config() {
        init_tracing();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(APP_SCHEMA.as_bytes()).unwrap();

        let config = ApiConfig {
            event: "#rpc".to_string(),
            schema_files: vec![file.path().to_path_buf()],
        };
        let api = Api::from_config(&config).unwrap();
        assert_eq!(api.event(), "#rpc");
        assert!(api.schemas().contains(".app.SomeResponse"));

        let endpoint = api.local(api.router().get("r", respond("y")));
        assert_eq!(endpoint.event(), "#rpc");
        let reply = endpoint.get("r", None, Value::Null).await.unwrap().unwrap();
        assert_eq!(reply.data, json!({ "c": "y" }));
    }

    async fn serve(api: &Api, table: RouteTable) -> (Arc<Server>, SocketAddr) {
        let server = Arc::new(api.server(ServerConfig::default(), table));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = server.clone();
        tokio::spawn(async move {
            running.serve(listener).await.unwrap();
        });
        while !server.is_running() {
            tokio::task::yield_now().await;
        }
        (server, addr)
    }

    #[tokio::test]
    async fn test_over_tcp() {
        let api = api();
        let table = api
            .router()
            .post("echo", echo())
            .put("reject", reject())
            .get(
                "slow",
                handler_fn(|_payload: Value| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(Reply::message(".app.SomeResponse", json!({ "c": "late" })))
                }),
            );
        let (server, addr) = serve(&api, table).await;
        let endpoint = api.connect(ConnectionConfig::new(addr)).await.unwrap();

        // the slow call must not hold up the fast one behind it
        let (slow, fast) = tokio::join!(
            endpoint.get("slow", None, Value::Null),
            endpoint.post("echo", Some(".app.SomeMessage"), json!({ "a": "q", "b": 1 })),
        );
        assert_eq!(slow.unwrap().unwrap().data, json!({ "c": "late" }));
        assert_eq!(fast.unwrap().unwrap().data, json!({ "c": "q:1" }));

        let declared = endpoint.put("reject", None, Value::Null).await.unwrap_err();
        assert_eq!(declared.message().unwrap().data_type, ".app.Rejection");

        let missing = endpoint.delete("nothing", None, Value::Null).await.unwrap_err();
        assert_eq!(missing.api_error().unwrap().code, 404);

        server.shutdown();
        endpoint.transport().close().await.unwrap();
    }

    #[tokio::test]
    async fn test_over_tcp_custom_event() {
        let api = api().with_event("#rpc");
        let (server, addr) = serve(&api, api.router().get("r", respond("z"))).await;
        assert_eq!(server.config().event, "#rpc");

        let endpoint = api.connect(ConnectionConfig::new(addr)).await.unwrap();
        let reply = endpoint.get("r", None, Value::Null).await.unwrap().unwrap();
        assert_eq!(reply.data, json!({ "c": "z" }));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let api = api();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = api.connect(ConnectionConfig::new(addr)).await.err().unwrap();
        assert!(matches!(err, TransportError::Io(_)));
    }
}

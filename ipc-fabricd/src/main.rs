use bytemuck::{Pod, Zeroable};
use clap::Parser;
use ipc_fabric::codec::{decode_variant, encode_variant, Message};
use ipc_fabric::listener::{ExceptionResponse, ListenerSupervisor};
use ipc_fabric::segment::SegmentParams;
use ipc_fabric_util::config::FabricConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ipc-fabricd", about = "Hosts one attachment's request/response endpoint")]
struct Cli {
    /// OS-visible name of the shared segment backing this endpoint.
    #[arg(long)]
    physical_name: String,

    /// Human-readable name shown in logs.
    #[arg(long, default_value = "ipc-fabricd attachment")]
    logical_name: String,

    /// Compatibility discriminator; joiners must match this exactly.
    #[arg(long, default_value_t = 1)]
    kind: u16,

    /// Compatibility version; joiners must match this exactly.
    #[arg(long, default_value_t = 1)]
    version: u16,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Load settings from a JSON config file instead of the flags above.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct EchoRequest {
    n: u64,
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct EchoResponse {
    n: u64,
}

enum Request {
    Echo(EchoRequest),
}

enum Response {
    Echo(EchoResponse),
    Exception(ExceptionResponse),
}

impl Message for Request {
    const MAX_SIZE: usize = std::mem::size_of::<EchoRequest>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        match self {
            Request::Echo(r) => (0, encode_variant(r, buf)),
        }
    }

    fn decode_from(discriminator: u8, payload_len: u16, buf: &[u8]) -> ipc_fabric::Result<Self> {
        match discriminator {
            0 => Ok(Request::Echo(decode_variant(payload_len, buf)?)),
            _ => Err(ipc_fabric::IpcError::InvalidMessage),
        }
    }
}

impl Message for Response {
    const MAX_SIZE: usize = std::mem::size_of::<ExceptionResponse>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        match self {
            Response::Echo(r) => (0, encode_variant(r, buf)),
            Response::Exception(e) => (1, encode_variant(e, buf)),
        }
    }

    fn decode_from(discriminator: u8, payload_len: u16, buf: &[u8]) -> ipc_fabric::Result<Self> {
        match discriminator {
            0 => Ok(Response::Echo(decode_variant(payload_len, buf)?)),
            1 => Ok(Response::Exception(decode_variant(payload_len, buf)?)),
            _ => Err(ipc_fabric::IpcError::InvalidMessage),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FabricConfig::load(path).expect("failed to load config file"),
        None => FabricConfig {
            physical_name: cli.physical_name.clone(),
            logical_name: cli.logical_name.clone(),
            kind: cli.kind,
            version: cli.version,
            log_level: cli.log_level.clone(),
        },
    };

    ipc_fabric_util::logging::init(&config.log_level);
    let logger = ipc_fabric_util::logging::root().clone();

    slog::info!(logger, "starting fabric attachment"; "physical_name" => &config.physical_name, "kind" => config.kind, "version" => config.version);

    let params = SegmentParams {
        physical_name: config.physical_name,
        logical_name: config.logical_name,
        kind: config.kind,
        version: config.version,
    };

    let _supervisor: ListenerSupervisor<Request, Response> = ListenerSupervisor::start(
        params,
        logger.clone(),
        (),
        |_user_name| true,
        |req, _identity| match req {
            Request::Echo(r) => Ok(Response::Echo(EchoResponse { n: r.n })),
        },
        Response::Exception,
        || {},
    )
    .expect("failed to start listener");

    slog::info!(logger, "listener running, blocking forever (Ctrl-C to stop)");

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

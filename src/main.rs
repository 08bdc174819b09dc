use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process;

use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use sfud::channel::{Channel, ChannelEvent, Notifier};
use sfud::settings::Settings;
use sfud::worker::{LogReloadHandle, Worker};

const EXIT_OK: i32 = 0;
const EXIT_INIT_ERROR: i32 = 41;
const EXIT_UNKNOWN: i32 = 42;
const EXIT_SIGNAL: i32 = 43;

fn main() {
    let settings = match Settings::from_args(std::env::args().skip(1)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sfud: {}", e);
            process::exit(EXIT_INIT_ERROR);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.env_filter_directives()));
    let (filter, log_handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build the event loop: {}", e);
            process::exit(EXIT_INIT_ERROR);
        }
    };

    let code = runtime.block_on(run(settings, log_handle));
    process::exit(code);
}

async fn run(settings: Settings, log_handle: LogReloadHandle) -> i32 {
    // The two channel fds are inherited from the supervisor, one per
    // direction. Taking ownership of a wrong fd is unrecoverable, hence the
    // init exit code on any failure here.
    let (reader, writer) = unsafe {
        let read_side = StdUnixStream::from_raw_fd(settings.channel_read_fd);
        let write_side = StdUnixStream::from_raw_fd(settings.channel_write_fd);
        (read_side, write_side)
    };

    let (reader, writer) = match into_async(reader, writer) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to set up the channel: {}", e);
            return EXIT_INIT_ERROR;
        }
    };
    let mut channel = Channel::new(reader, writer);

    let mut worker = Worker::with_log_handle(log_handle);
    let mut notifier = Notifier::new();

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install signal handler: {}", e);
            return EXIT_INIT_ERROR;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install signal handler: {}", e);
            return EXIT_INIT_ERROR;
        }
    };

    info!("Worker running");

    loop {
        tokio::select! {
            event = channel.next() => match event {
                Ok(ChannelEvent::Request(request)) => {
                    match worker.handle_request(&request, &mut notifier) {
                        Ok(data) => channel.send_accepted(request.id, data),
                        Err(e) => channel.send_rejected(request.id, &e.to_string()),
                    }
                    for notification in notifier.drain() {
                        channel.send_notification(&notification);
                    }
                }
                Ok(ChannelEvent::Closed { by_peer }) => {
                    info!("Channel closed (by_peer: {}), shutting down", by_peer);
                    worker.close(&mut notifier);
                    channel.close().await;
                    return EXIT_OK;
                }
                Err(e) => {
                    error!("Channel error, shutting down: {}", e);
                    worker.close(&mut notifier);
                    channel.close().await;
                    return EXIT_UNKNOWN;
                }
            },
            _ = sigterm.recv() => {
                info!("SIGTERM, shutting down");
                worker.close(&mut notifier);
                channel.close().await;
                return EXIT_SIGNAL;
            }
            _ = sigint.recv() => {
                info!("SIGINT, shutting down");
                worker.close(&mut notifier);
                channel.close().await;
                return EXIT_SIGNAL;
            }
        }
    }
}

fn into_async(
    reader: StdUnixStream,
    writer: StdUnixStream,
) -> std::io::Result<(UnixStream, UnixStream)> {
    reader.set_nonblocking(true)?;
    writer.set_nonblocking(true)?;
    Ok((UnixStream::from_std(reader)?, UnixStream::from_std(writer)?))
}

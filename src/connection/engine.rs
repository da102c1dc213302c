// src/connection/engine.rs

use crate::connection::{ConnectionEvent, EventSink};
use crate::endpoint::Endpoint;
use crate::error::NsqError;
use crate::options::ConnectionOptions;
use crate::protocol::codec::OK_BODY;
use crate::protocol::{Command, Frame, FrameCodec, IdentifyData, IdentifyResponse, MAGIC_V2};

use async_channel::Receiver as AsyncReceiver;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::oneshot;
use tokio_util::codec::FramedRead;

type FrameStream<S> = FramedRead<ReadHalf<S>, FrameCodec>;

/// Protocol driver for one established stream: magic, IDENTIFY negotiation,
/// then the frame loop. Generic over the stream so it can run on a mock.
pub(crate) struct ConnectionEngine<S> {
  endpoint: Endpoint,
  options: Arc<ConnectionOptions>,
  events: EventSink,
  stream: S,
}

impl<S> ConnectionEngine<S>
where
  S: AsyncRead + AsyncWrite + Send + Unpin,
{
  pub(crate) fn new(endpoint: Endpoint, options: Arc<ConnectionOptions>, events: EventSink, stream: S) -> Self {
    Self {
      endpoint,
      options,
      events,
      stream,
    }
  }

  /// Runs until the peer closes, `shutdown` fires, or an error occurs.
  /// Does not emit `Close`; the caller does that once, whatever the outcome.
  pub(crate) async fn run(
    self,
    outbound: AsyncReceiver<Bytes>,
    mut shutdown: oneshot::Receiver<()>,
  ) -> Result<(), NsqError> {
    let ConnectionEngine {
      endpoint,
      options,
      events,
      stream,
    } = self;
    let handle = events.handle();

    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut frames = FramedRead::new(read_half, FrameCodec::new(options.max_frame_size));

    // --- Negotiation ---
    write_half.write_all(MAGIC_V2).await?;
    let identify = IdentifyData::from_options(&options);
    let body = identify.to_json()?;
    events.emit(ConnectionEvent::Identify(identify));
    write_half.write_all(&Command::Identify(body).to_bytes()).await?;
    write_half.flush().await?;

    let reply = tokio::select! {
      biased;
      _ = &mut shutdown => {
        tracing::debug!(handle, endpoint = %endpoint, "Close requested during IDENTIFY");
        return Ok(());
      }
      result = tokio::time::timeout(options.connect_timeout, next_frame(&mut frames)) => {
        result.map_err(|_| NsqError::Timeout)??
      }
    };
    match reply {
      Frame::Response(data) if data.as_ref() == OK_BODY => {}
      Frame::Response(data) => {
        let negotiated = IdentifyResponse::parse(&data)?;
        if negotiated.auth_required {
          tracing::warn!(handle, endpoint = %endpoint, "nsqd requires AUTH, which is not supported; publishes may fail");
        }
        events.emit(ConnectionEvent::IdentifyResponse(negotiated));
      }
      Frame::Error(data) => return Err(NsqError::from_error_frame(&data)),
      Frame::Message(_) => {
        return Err(NsqError::ProtocolViolation("message frame in reply to IDENTIFY".into()));
      }
    }
    events.emit(ConnectionEvent::Ready);
    tracing::debug!(handle, endpoint = %endpoint, "Connection negotiated");

    // --- Frame loop ---
    let result = loop {
      tokio::select! {
        biased;
        _ = &mut shutdown => {
          tracing::debug!(handle, endpoint = %endpoint, "Close requested");
          break Ok(());
        }
        frame = frames.next() => {
          match frame {
            None => {
              tracing::debug!(handle, endpoint = %endpoint, "nsqd closed the connection");
              break Ok(());
            }
            Some(Err(e)) => break Err(e),
            Some(Ok(frame)) if frame.is_heartbeat() => {
              write_half.write_all(&Command::Nop.to_bytes()).await?;
              events.emit(ConnectionEvent::Heartbeat);
            }
            Some(Ok(Frame::Response(data))) => events.emit(ConnectionEvent::Response(data)),
            Some(Ok(Frame::Error(data))) => events.emit(ConnectionEvent::Error(data)),
            Some(Ok(Frame::Message(data))) => {
              tracing::warn!(handle, endpoint = %endpoint, len = data.len(), "Unexpected message frame on publisher connection, dropping");
            }
          }
        }
        data = outbound.recv() => {
          match data {
            Ok(bytes) => write_half.write_all(&bytes).await?,
            Err(_) => {
              tracing::debug!(handle, endpoint = %endpoint, "Outbound channel closed");
              break Ok(());
            }
          }
        }
      }
    };

    let _ = write_half.shutdown().await;
    result
  }
}

async fn next_frame<S>(frames: &mut FrameStream<S>) -> Result<Frame, NsqError>
where
  S: AsyncRead + Unpin,
{
  match frames.next().await {
    Some(frame) => frame,
    None => Err(NsqError::ConnectionClosed),
  }
}

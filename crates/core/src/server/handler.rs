//! Per-connection RTSP method dispatch.
//!
//! One handler lives for the lifetime of a TCP connection. It enforces the
//! per-connection CSeq ordering, resolves sessions through the shared
//! directory, and drives the data plane over the [`StreamControl`] seam.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::bridge::StreamControl;
use crate::error::{Error, Result};
use crate::media::split_media_uri;
use crate::protocol::{Cast, Method, Request, Response, Sdp};
use crate::session::{Media, SessionDirectory};

pub struct MethodHandler {
    sessions: Arc<SessionDirectory>,
    control: Arc<dyn StreamControl>,
    client_addr: SocketAddr,
    last_cseq: u32,
}

enum Provision {
    /// The media already has a worker; reply with the recorded port.
    Existing(u16),
    /// A fresh media entry was added; `created_source` records whether the
    /// source came into being with it.
    Created { created_source: bool },
}

impl MethodHandler {
    pub fn new(
        sessions: Arc<SessionDirectory>,
        control: Arc<dyn StreamControl>,
        client_addr: SocketAddr,
    ) -> MethodHandler {
        MethodHandler {
            sessions,
            control,
            client_addr,
            last_cseq: 0,
        }
    }

    pub fn handle(&mut self, request: &Request) -> Response {
        if request.cseq <= self.last_cseq {
            let err = Error::CseqOutOfOrder {
                got: request.cseq,
                last: self.last_cseq,
            };
            tracing::warn!(peer = %self.client_addr, error = %err, "request rejected");
            return Response::server_error(request);
        }
        self.last_cseq = request.cseq;

        match request.method {
            Method::Options => Response::options_ok(request),
            Method::Describe => self.describe(request),
            Method::Setup => self.setup(request),
            Method::Play => self.simple_command(request, |control, uri, ssrc| {
                control.play(uri, ssrc)
            }),
            Method::Pause => self.simple_command(request, |control, uri, ssrc| {
                control.pause(uri, ssrc)
            }),
            Method::Teardown => self.teardown(request),
        }
    }

    fn describe(&self, request: &Request) -> Response {
        tracing::debug!(cseq = request.cseq, uri = %request.uri, "DESCRIBE");
        // Descriptions exist at source level only.
        if split_media_uri(&request.uri).is_some() {
            return Response::not_found(request);
        }
        match self.control.check_exists(&request.uri) {
            Ok(true) => {
                let sdp = Sdp::describe(&request.uri).serialize();
                Response::describe_ok(request, sdp)
            }
            Ok(false) => {
                tracing::warn!(uri = %request.uri, "DESCRIBE for unknown path");
                Response::not_found(request)
            }
            Err(e) => {
                tracing::warn!(uri = %request.uri, error = %e, "DESCRIBE existence check failed");
                Response::server_error(request)
            }
        }
    }

    fn setup(&mut self, request: &Request) -> Response {
        tracing::debug!(cseq = request.cseq, uri = %request.uri, "SETUP");
        let Some((global_uri, kind)) = split_media_uri(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP without media suffix");
            return Response::not_found(request);
        };
        if request.cast == Cast::Multicast {
            tracing::warn!(uri = %request.uri, "multicast SETUP not supported");
            return Response::server_error(request);
        }
        let Some(client_port) = request.client_port else {
            return Response::server_error(request);
        };
        let IpAddr::V4(client_ip) = self.client_addr.ip() else {
            tracing::warn!(peer = %self.client_addr, "non-IPv4 peer cannot receive RTP");
            return Response::server_error(request);
        };

        let session_id = match self
            .sessions
            .resolve(request.session, self.client_addr)
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "SETUP session resolution failed");
                return Response::server_error(request);
            }
        };

        let provision = self.sessions.with_session(session_id, |session| {
            let (source, created_source) = session.source_mut_or_insert(global_uri);
            if let Some(media) = source.media(&request.uri) {
                return match media.ssrc {
                    // SETUP again on a provisioned media is a no-op.
                    Some(_) => Ok(Provision::Existing(media.server_port)),
                    None => Err(Error::StreamNotFound(request.uri.clone())),
                };
            }
            source.medias.push(Media::new(&request.uri, kind));
            Ok(Provision::Created { created_source })
        });

        let created_source = match provision {
            Ok(Provision::Existing(server_port)) => {
                tracing::debug!(session_id, uri = %request.uri, "SETUP on provisioned media");
                return Response::setup_ok(request, session_id, server_port);
            }
            Ok(Provision::Created { created_source }) => created_source,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "SETUP provisioning refused");
                return Response::server_error(request);
            }
        };

        // The directory lock is released across the blocking round trip;
        // the session must be looked up again afterwards.
        let setup = self
            .control
            .setup_unicast(&request.uri, session_id, client_ip, client_port);
        let (ssrc, server_port) = match setup {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(session_id, uri = %request.uri, error = %e, "worker creation failed");
                self.unwind_setup(session_id, global_uri, &request.uri, created_source);
                return Response::server_error(request);
            }
        };

        let bound = self.sessions.with_session(session_id, |session| {
            let source = session
                .source_mut(global_uri)
                .ok_or_else(|| Error::StreamNotFound(global_uri.to_string()))?;
            let media = source
                .media_mut(&request.uri)
                .ok_or_else(|| Error::StreamNotFound(request.uri.clone()))?;
            media.ssrc = Some(ssrc);
            media.server_port = server_port;
            Ok(())
        });

        match bound {
            Ok(()) => {
                tracing::info!(
                    session_id,
                    uri = %request.uri,
                    ssrc = format_args!("{ssrc:#010x}"),
                    server_port,
                    "media bound"
                );
                Response::setup_ok(request, session_id, server_port)
            }
            Err(e) => {
                // The session vanished while the lock was released; the
                // fresh worker must not outlive it.
                tracing::warn!(session_id, error = %e, "session vanished during SETUP");
                if let Err(e) = self.control.teardown(&request.uri, ssrc) {
                    tracing::warn!(error = %e, "orphaned worker teardown failed");
                }
                Response::server_error(request)
            }
        }
    }

    /// Undo whatever a failed SETUP created before the worker came up.
    fn unwind_setup(&self, session_id: u64, global_uri: &str, uri: &str, created_source: bool) {
        let _ = self.sessions.with_session(session_id, |session| {
            if let Some(source) = session.source_mut(global_uri) {
                source.remove_media(uri);
                if created_source && source.medias.is_empty() {
                    session.remove_source(global_uri);
                }
            }
            Ok(())
        });
    }

    /// PLAY and PAUSE: route to one media (leaf URI) or fan out over every
    /// media of the source (global URI). Fan-out is best-effort — every
    /// media is attempted, and any individual failure fails the response.
    fn simple_command(
        &self,
        request: &Request,
        send: impl Fn(&dyn StreamControl, &str, u32) -> Result<()>,
    ) -> Response {
        let Some(session_id) = request.session else {
            return Response::server_error(request);
        };
        let control = self.control.as_ref();

        let result = self.sessions.with_session(session_id, |session| {
            let (global_uri, leaf) = match split_media_uri(&request.uri) {
                Some((global, _)) => (global, true),
                None => (request.uri.as_str(), false),
            };
            let source = session
                .source(global_uri)
                .ok_or_else(|| Error::StreamNotFound(global_uri.to_string()))?;

            let mut failed = false;
            if leaf {
                let media = source
                    .media(&request.uri)
                    .ok_or_else(|| Error::StreamNotFound(request.uri.clone()))?;
                match media.ssrc {
                    Some(ssrc) => failed = send(control, &media.uri, ssrc).is_err(),
                    None => failed = true,
                }
            } else {
                for media in &source.medias {
                    match media.ssrc {
                        Some(ssrc) => {
                            if let Err(e) = send(control, &media.uri, ssrc) {
                                tracing::warn!(uri = %media.uri, error = %e, "command failed");
                                failed = true;
                            }
                        }
                        None => failed = true,
                    }
                }
            }
            if failed {
                Err(Error::Bridge("command fan-out failed".to_string()))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => Response::command_ok(request),
            Err(e) => {
                tracing::warn!(session_id, uri = %request.uri, error = %e, "command refused");
                Response::server_error(request)
            }
        }
    }

    /// TEARDOWN: command fan-out like PLAY/PAUSE, then removal of the
    /// targeted media (leaf) or the whole source (global). Removal happens
    /// even when some commands failed; only the response reports the
    /// failure.
    fn teardown(&self, request: &Request) -> Response {
        tracing::debug!(cseq = request.cseq, uri = %request.uri, "TEARDOWN");
        let Some(session_id) = request.session else {
            return Response::server_error(request);
        };
        let control = self.control.as_ref();

        let result = self.sessions.with_session(session_id, |session| {
            let (global_uri, leaf) = match split_media_uri(&request.uri) {
                Some((global, _)) => (global, true),
                None => (request.uri.as_str(), false),
            };
            let source = session
                .source_mut(global_uri)
                .ok_or_else(|| Error::StreamNotFound(global_uri.to_string()))?;

            let mut failed = false;
            if leaf {
                let media = source
                    .media(&request.uri)
                    .ok_or_else(|| Error::StreamNotFound(request.uri.clone()))?;
                match media.ssrc {
                    Some(ssrc) => failed = control.teardown(&media.uri, ssrc).is_err(),
                    None => failed = true,
                }
                source.remove_media(&request.uri);
                tracing::info!(session_id, uri = %request.uri, "media torn down");
            } else {
                for media in &source.medias {
                    match media.ssrc {
                        Some(ssrc) => {
                            if let Err(e) = control.teardown(&media.uri, ssrc) {
                                tracing::warn!(uri = %media.uri, error = %e, "teardown failed");
                                failed = true;
                            }
                        }
                        None => failed = true,
                    }
                }
                session.remove_source(global_uri);
                tracing::info!(session_id, uri = %request.uri, "source torn down");
            }
            if failed {
                Err(Error::Bridge("teardown fan-out failed".to_string()))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => Response::command_ok(request),
            Err(e) => {
                tracing::warn!(session_id, uri = %request.uri, error = %e, "TEARDOWN refused");
                Response::server_error(request)
            }
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP front door: accept, bootstrap a Connection per socket, and on
//! shutdown ask live sessions to log out before the listener goes away.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cfg::config::Config,
    models::{
        async_msg::response::{AsyncEvent, AsyncMessage, AsyncMessageBuilder},
        common::BHS_LEN,
        data_format::PduFrame,
    },
    server::{
        connection::{Connection, Phase},
        registry::TargetRegistry,
        session::SessionRegistry,
    },
};

pub struct TargetServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<TargetRegistry>,
    sessions: Arc<SessionRegistry>,
    sloppy: bool,
    cancel: CancellationToken,
}

impl TargetServer {
    /// Binds the configured port.  Fails fast so the process can exit
    /// non-zero before any initiator connects.
    pub async fn bind(cfg: &Config, registry: Arc<TargetRegistry>) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr().context("local_addr failed")?;
        info!(%local_addr, targets = registry.entries().len(), "iSCSI target listening");

        Ok(Self {
            listener,
            local_addr,
            registry,
            sessions: Arc::new(SessionRegistry::new()),
            sloppy: cfg.allow_sloppy_negotiation,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Token that stops the accept loop and all connections.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accepts until cancelled; on the way out, asks every live
    /// full-feature connection to log out.
    pub async fn run(self) -> Result<()> {
        loop {
            let accepted: std::io::Result<(TcpStream, SocketAddr)> = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                },
            };

            let conn = match Connection::new(
                stream,
                Arc::clone(&self.registry),
                Arc::clone(&self.sessions),
                self.local_addr.to_string(),
                self.sloppy,
                self.cancel.child_token(),
            ) {
                Ok(c) => c,
                Err(e) => {
                    warn!(%peer, error = %e, "connection setup failed");
                    continue;
                },
            };

            tokio::spawn(async move {
                if let Err(e) = conn.serve().await {
                    warn!(%peer, error = %e, "connection worker failed");
                }
            });
        }

        self.request_logouts().await;
        info!("iSCSI target stopped");
        Ok(())
    }

    /// Async Message (RequestLogout) to every live connection, so
    /// initiators can close cleanly during the Time2Wait they are told.
    async fn request_logouts(&self) {
        for session in self.sessions.all() {
            let settings = session.settings();
            let connections: Vec<_> = session
                .connections
                .iter()
                .filter_map(|c| c.value().upgrade())
                .collect();
            for conn in connections {
                if conn.phase() != Phase::FullFeature {
                    continue;
                }

                let (exp, max) = session.cmd_window();
                let builder = AsyncMessageBuilder::new(AsyncEvent::RequestLogout)
                    .stat_sn(conn.next_stat_sn())
                    .cmd_window(exp, max)
                    .logout_timers(
                        settings.session.default_time2wait,
                        settings.session.default_time2retain,
                    );

                let mut bhs = [0u8; BHS_LEN];
                if builder.header.to_bhs_bytes(&mut bhs).is_err() {
                    continue;
                }
                let mut frame = PduFrame::<AsyncMessage>::new_reply(
                    bhs,
                    conn.digest_flags(),
                );
                if let Err(e) = conn.send_frame(&mut frame).await {
                    warn!(tsih = session.tsih, error = %e, "logout request failed");
                }
            }
        }
    }
}

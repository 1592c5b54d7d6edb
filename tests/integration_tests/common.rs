// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-process target plus a minimal initiator: enough of the client
//! side of RFC 3720 to drive every end-to-end scenario over a real
//! TCP loopback socket.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use iscsi_target_rs::{
    cfg::config::{Config, LoggerConfig},
    models::{
        command::{
            request::{ScsiCommandRequest, ScsiCommandRequestBuilder},
            response::ScsiCommandResponse,
        },
        common::{BHS_LEN, BasicHeaderSegment, ZeroCopyBhs, raw_segment_lengths},
        data_format::{DigestFlags, PduFrame, pad_len, verify_wire_trailer},
        login::{
            common::Stage,
            request::{LoginRequest, LoginRequestBuilder},
            response::LoginResponse,
        },
        opcode::Opcode,
    },
    server::{
        registry::TargetRegistry,
        server::TargetServer,
        session::SessionRegistry,
    },
    storage::{BLOCK_SIZE, BlockStore, MemBlockStore, SharedBlockStore},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;

pub const TARGET_IQN: &str = "iqn.2012-07.org.example:disk1";
pub const INITIATOR_IQN: &str = "iqn.1993-08.org.example:host1";
pub const ISID: [u8; 6] = [0x00, 0x02, 0x3d, 0x00, 0x00, 0x01];

/// BlockStore wrapper that counts calls, for "store never touched"
/// assertions.
pub struct CountingStore {
    inner: MemBlockStore,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl CountingStore {
    pub fn new(blocks: u64) -> Result<Self> {
        Ok(Self {
            inner: MemBlockStore::new(blocks * BLOCK_SIZE as u64)?,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl BlockStore for CountingStore {
    fn read(&self, dst: &mut [u8], offset: u64) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(dst, offset)
    }

    fn write(&self, src: &[u8], offset: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(src, offset)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn size_in_bytes(&self) -> u64 {
        self.inner.size_in_bytes()
    }
}

/// A running target on an ephemeral loopback port.
pub struct TestTarget {
    pub addr: SocketAddr,
    pub sessions: Arc<SessionRegistry>,
    cancel: CancellationToken,
}

impl Drop for TestTarget {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn spawn_target(store: SharedBlockStore) -> Result<TestTarget> {
    let cfg = Config {
        port: 0,
        allow_sloppy_negotiation: false,
        logger: LoggerConfig::default(),
        targets: Vec::new(),
    };

    let registry = Arc::new(TargetRegistry::new());
    registry.insert(TARGET_IQN.to_string(), Some("disk1".to_string()), store)?;

    let server = TargetServer::bind(&cfg, registry).await?;
    let addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));
    let sessions = server.sessions();
    let cancel = server.cancellation_token();

    tokio::spawn(server.run());

    Ok(TestTarget { addr, sessions, cancel })
}

pub async fn spawn_target_with_blocks(blocks: u64) -> Result<TestTarget> {
    let store = MemBlockStore::new(blocks * BLOCK_SIZE as u64)?;
    spawn_target(Arc::new(store)).await
}

/// The initiator half of one connection.
pub struct Initiator {
    stream: TcpStream,
    pub digests: DigestFlags,
    pub cmd_sn: u32,
    pub exp_stat_sn: u32,
    next_itt: u32,
}

impl Initiator {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("initiator connect failed")?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            digests: DigestFlags::NONE,
            cmd_sn: 1,
            exp_stat_sn: 0,
            next_itt: 1,
        })
    }

    pub fn next_itt(&mut self) -> u32 {
        let itt = self.next_itt;
        self.next_itt += 1;
        itt
    }

    pub async fn send_frame<T>(&mut self, frame: &mut PduFrame<T>) -> Result<()>
    where T: BasicHeaderSegment + ZeroCopyBhs {
        let (bhs, body) = frame.build()?;
        self.stream.write_all(&bhs).await?;
        if !body.is_empty() {
            self.stream.write_all(&body).await?;
        }
        Ok(())
    }

    /// Raw bytes out, for deliberately corrupted PDUs.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Reads one PDU with the digest settings currently in force and
    /// returns `(BHS, data segment)`.
    pub async fn recv(&mut self) -> Result<([u8; BHS_LEN], Vec<u8>)> {
        self.recv_with(self.digests).await
    }

    pub async fn recv_with(
        &mut self,
        digests: DigestFlags,
    ) -> Result<([u8; BHS_LEN], Vec<u8>)> {
        let mut bhs = [0u8; BHS_LEN];
        self.stream.read_exact(&mut bhs).await.context("read BHS")?;

        let (ahs_len, data_len) = raw_segment_lengths(&bhs);
        let trailer_len = ahs_len
            + pad_len(ahs_len)
            + 4 * digests.header as usize
            + data_len
            + pad_len(data_len)
            + 4 * (digests.data && data_len > 0) as usize;

        let mut trailer = vec![0u8; trailer_len];
        self.stream
            .read_exact(&mut trailer)
            .await
            .context("read trailer")?;

        let range = verify_wire_trailer(&bhs, &trailer, digests)
            .map_err(|e| anyhow::anyhow!("inbound digest check failed: {e}"))?;
        Ok((bhs, trailer[range].to_vec()))
    }

    /// Expect EOF: the target hung up.
    pub async fn expect_closed(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte).await {
            Ok(0) => Ok(()),
            Ok(_) => bail!("expected EOF, got data"),
            // reset also counts as closed
            Err(_) => Ok(()),
        }
    }

    /// Single-round operational login against `target`.  Extra keys are
    /// sent verbatim after the identity block.  Returns the TSIH.
    pub async fn login_normal(
        &mut self,
        extra_keys: &[(&str, &str)],
    ) -> Result<u16> {
        self.login_with(
            &[
                ("InitiatorName", INITIATOR_IQN),
                ("SessionType", "Normal"),
                ("TargetName", TARGET_IQN),
            ],
            extra_keys,
        )
        .await
    }

    pub async fn login_discovery(&mut self) -> Result<u16> {
        self.login_with(
            &[
                ("InitiatorName", INITIATOR_IQN),
                ("SessionType", "Discovery"),
            ],
            &[],
        )
        .await
    }

    async fn login_with(
        &mut self,
        identity: &[(&str, &str)],
        extra_keys: &[(&str, &str)],
    ) -> Result<u16> {
        let itt = self.next_itt();
        let builder = LoginRequestBuilder::new(ISID, 0)
            .transit()
            .csg(Stage::Operational)
            .nsg(Stage::FullFeature)
            .versions(0x00, 0x00)
            .initiator_task_tag(itt)
            .connection_id(0)
            .cmd_sn(self.cmd_sn)
            .exp_stat_sn(self.exp_stat_sn);

        let mut bhs = [0u8; BHS_LEN];
        builder.header.to_bhs_bytes(&mut bhs)?;
        // login PDUs are never digested
        let mut frame = PduFrame::<LoginRequest>::new_reply(bhs, DigestFlags::NONE);

        let mut text = Vec::new();
        for (k, v) in identity.iter().chain(extra_keys) {
            text.extend_from_slice(k.as_bytes());
            text.push(b'=');
            text.extend_from_slice(v.as_bytes());
            text.push(0);
        }
        frame.append_data(&text);
        self.send_frame(&mut frame).await?;

        let (resp_bhs, _resp_data) = self.recv_with(DigestFlags::NONE).await?;
        let resp = LoginResponse::from_bhs_bytes(&resp_bhs)?;

        let status = resp.status()?;
        if status.is_fatal() {
            bail!("login failed: {status}");
        }
        assert!(resp.flags.transit(), "target must agree to transit");
        assert_eq!(resp.flags.nsg(), Some(Stage::FullFeature));
        assert_ne!(resp.tsih.get(), 0, "TSIH must be assigned");

        self.exp_stat_sn = resp.stat_sn.get().wrapping_add(1);

        // digests start once full-feature phase begins
        let wants = |key: &str| {
            extra_keys
                .iter()
                .any(|(k, v)| *k == key && v.starts_with("CRC32C"))
        };
        self.digests = DigestFlags::new(wants("HeaderDigest"), wants("DataDigest"));

        Ok(resp.tsih.get())
    }

    /// Sends one SCSI command, optionally with immediate data.
    pub async fn send_scsi(
        &mut self,
        cdb: &[u8; 16],
        edtl: u32,
        read: bool,
        write: bool,
        immediate_data: &[u8],
    ) -> Result<u32> {
        let itt = self.next_itt();
        let mut builder = ScsiCommandRequestBuilder::new()
            .lun(0)
            .initiator_task_tag(itt)
            .expected_data_transfer_length(edtl)
            .cmd_sn(self.cmd_sn)
            .exp_stat_sn(self.exp_stat_sn)
            .cdb(cdb);
        if read {
            builder = builder.read();
        }
        if write {
            builder = builder.write();
        }

        let mut bhs = [0u8; BHS_LEN];
        builder.header.to_bhs_bytes(&mut bhs)?;
        let mut frame =
            PduFrame::<ScsiCommandRequest>::new_reply(bhs, self.digests);
        if !immediate_data.is_empty() {
            frame.append_data(immediate_data);
        }
        self.send_frame(&mut frame).await?;

        self.cmd_sn = self.cmd_sn.wrapping_add(1);
        Ok(itt)
    }

    /// Collects the Data-In stream of one READ-style command up to the
    /// final SCSI Response.  Returns `(payload, status, sense data)`.
    pub async fn collect_data_in(&mut self) -> Result<(Vec<u8>, u8, Vec<u8>)> {
        let mut payload = Vec::new();
        loop {
            let (bhs, data) = self.recv().await?;
            match bhs[0] & 0x3f {
                op if op == Opcode::ScsiDataIn as u8 => {
                    let offset = u32::from_be_bytes([
                        bhs[40], bhs[41], bhs[42], bhs[43],
                    ]) as usize;
                    if payload.len() < offset + data.len() {
                        payload.resize(offset + data.len(), 0);
                    }
                    payload[offset..offset + data.len()].copy_from_slice(&data);
                },
                op if op == Opcode::ScsiCommandResp as u8 => {
                    let resp = ScsiCommandResponse::from_bhs_bytes(&bhs)?;
                    self.exp_stat_sn = resp.stat_sn.get().wrapping_add(1);
                    return Ok((payload, resp.status.raw(), data));
                },
                other => bail!("unexpected opcode 0x{other:02x} in data stream"),
            }
        }
    }
}

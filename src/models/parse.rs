// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Opcode-dispatched typed views over a raw 48-byte BHS.
//!
//! `Pdu::from_bhs_bytes` is the single entry point the connection uses
//! to turn an undecoded header into a typed sum; everything downstream
//! matches on the variant instead of downcasting.

use anyhow::Result;
use enum_dispatch::enum_dispatch;
use zerocopy::FromBytes;

use crate::{
    errors::CodecError,
    models::{
        async_msg::response::AsyncMessage,
        command::{request::ScsiCommandRequest, response::ScsiCommandResponse},
        common::{BasicHeaderSegment, PduFlags},
        data::{request::ScsiDataOut, response::ScsiDataIn},
        login::{request::LoginRequest, response::LoginResponse},
        logout::{request::LogoutRequest, response::LogoutResponse},
        nop::{request::NopOutRequest, response::NopInResponse},
        opcode::{BhsOpcode, Opcode},
        ready_2_transfer::response::ReadyToTransfer,
        reject::response::RejectPdu,
        text::{request::TextRequest, response::TextResponse},
    },
};

#[enum_dispatch(BasicHeaderSegment, PduFlags)]
#[derive(Debug)]
pub enum Pdu<'a> {
    NopOutRequest(&'a mut NopOutRequest),
    ScsiCommandRequest(&'a mut ScsiCommandRequest),
    LoginRequest(&'a mut LoginRequest),
    TextRequest(&'a mut TextRequest),
    ScsiDataOut(&'a mut ScsiDataOut),
    LogoutRequest(&'a mut LogoutRequest),
    NopInResponse(&'a mut NopInResponse),
    ScsiCommandResponse(&'a mut ScsiCommandResponse),
    LoginResponse(&'a mut LoginResponse),
    TextResponse(&'a mut TextResponse),
    ScsiDataIn(&'a mut ScsiDataIn),
    LogoutResponse(&'a mut LogoutResponse),
    ReadyToTransfer(&'a mut ReadyToTransfer),
    AsyncMessage(&'a mut AsyncMessage),
    RejectPdu(&'a mut RejectPdu),
}

macro_rules! map_view {
    ($variant:ident, $ty:ty, $bytes:expr) => {
        <$ty as FromBytes>::mut_from_bytes($bytes)
            .map(Pdu::$variant)
            .map_err(|_| CodecError::InvalidField("BHS"))
    };
}

impl<'a> Pdu<'a> {
    pub fn from_bhs_bytes(bytes: &'a mut [u8]) -> Result<Self, CodecError> {
        let bhs = BhsOpcode::try_from(bytes[0])?;
        match bhs.opcode {
            Opcode::NopOut => map_view!(NopOutRequest, NopOutRequest, bytes),
            Opcode::ScsiCommandReq => {
                map_view!(ScsiCommandRequest, ScsiCommandRequest, bytes)
            },
            Opcode::LoginReq => map_view!(LoginRequest, LoginRequest, bytes),
            Opcode::TextReq => map_view!(TextRequest, TextRequest, bytes),
            Opcode::ScsiDataOut => map_view!(ScsiDataOut, ScsiDataOut, bytes),
            Opcode::LogoutReq => map_view!(LogoutRequest, LogoutRequest, bytes),
            Opcode::NopIn => map_view!(NopInResponse, NopInResponse, bytes),
            Opcode::ScsiCommandResp => {
                map_view!(ScsiCommandResponse, ScsiCommandResponse, bytes)
            },
            Opcode::LoginResp => map_view!(LoginResponse, LoginResponse, bytes),
            Opcode::TextResp => map_view!(TextResponse, TextResponse, bytes),
            Opcode::ScsiDataIn => map_view!(ScsiDataIn, ScsiDataIn, bytes),
            Opcode::LogoutResp => map_view!(LogoutResponse, LogoutResponse, bytes),
            Opcode::ReadyToTransfer => {
                map_view!(ReadyToTransfer, ReadyToTransfer, bytes)
            },
            Opcode::AsyncMessage => map_view!(AsyncMessage, AsyncMessage, bytes),
            Opcode::Reject => map_view!(RejectPdu, RejectPdu, bytes),
            // defined by the RFC but carrying no typed view here
            Opcode::ScsiTaskMgmtReq
            | Opcode::ScsiTaskMgmtResp
            | Opcode::SnackReq => Err(CodecError::UnknownOpcode(bhs.opcode as u8)),
        }
    }
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Messages and client for the `flagd.sync.v1.FlagSyncService` RPC contract.
//!
//! Only the calls the connector makes are defined, so the message types are
//! maintained by hand rather than generated at build time.

use loom_flagd_core::{Metadata, MetadataValue};
use prost_types::value::Kind;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;

const SYNC_FLAGS_PATH: &str = "/flagd.sync.v1.FlagSyncService/SyncFlags";
const GET_METADATA_PATH: &str = "/flagd.sync.v1.FlagSyncService/GetMetadata";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncFlagsRequest {
	#[prost(string, tag = "1")]
	pub provider_id: String,
	#[prost(string, tag = "2")]
	pub selector: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncFlagsResponse {
	#[prost(string, tag = "1")]
	pub flag_configuration: String,
	#[prost(message, optional, tag = "2")]
	pub sync_context: Option<prost_types::Struct>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetMetadataRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetadataResponse {
	#[prost(message, optional, tag = "2")]
	pub metadata: Option<prost_types::Struct>,
}

/// Client for `flagd.sync.v1.FlagSyncService`.
#[derive(Debug, Clone)]
pub struct FlagSyncServiceClient {
	inner: tonic::client::Grpc<Channel>,
}

impl FlagSyncServiceClient {
	pub fn new(channel: Channel) -> Self {
		Self {
			inner: tonic::client::Grpc::new(channel),
		}
	}

	pub async fn sync_flags(
		&mut self,
		request: tonic::Request<SyncFlagsRequest>,
	) -> Result<tonic::Response<tonic::Streaming<SyncFlagsResponse>>, tonic::Status> {
		self.ready().await?;
		let codec = tonic::codec::ProstCodec::default();
		self.inner
			.server_streaming(request, PathAndQuery::from_static(SYNC_FLAGS_PATH), codec)
			.await
	}

	pub async fn get_metadata(
		&mut self,
		request: tonic::Request<GetMetadataRequest>,
	) -> Result<tonic::Response<GetMetadataResponse>, tonic::Status> {
		self.ready().await?;
		let codec = tonic::codec::ProstCodec::default();
		self.inner
			.unary(request, PathAndQuery::from_static(GET_METADATA_PATH), codec)
			.await
	}

	async fn ready(&mut self) -> Result<(), tonic::Status> {
		self.inner
			.ready()
			.await
			.map_err(|e| tonic::Status::unavailable(format!("service was not ready: {e}")))
	}
}

/// Converts a protobuf `Struct` into flag metadata. Non-scalar fields are
/// dropped since metadata values are scalars.
pub fn struct_to_metadata(value: prost_types::Struct) -> Metadata {
	value
		.fields
		.into_iter()
		.filter_map(|(key, value)| {
			let converted = match value.kind? {
				Kind::BoolValue(b) => MetadataValue::Boolean(b),
				Kind::StringValue(s) => MetadataValue::String(s),
				Kind::NumberValue(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
					MetadataValue::Integer(n as i64)
				}
				Kind::NumberValue(n) => MetadataValue::Double(n),
				Kind::NullValue(_) | Kind::StructValue(_) | Kind::ListValue(_) => return None,
			};
			Some((key, converted))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use prost::Message;
	use std::collections::BTreeMap;

	fn value(kind: Kind) -> prost_types::Value {
		prost_types::Value { kind: Some(kind) }
	}

	#[test]
	fn test_struct_to_metadata_keeps_scalars() {
		let fields = BTreeMap::from([
			("scope".to_string(), value(Kind::StringValue("app".to_string()))),
			("version".to_string(), value(Kind::NumberValue(3.0))),
			("ratio".to_string(), value(Kind::NumberValue(0.25))),
			("beta".to_string(), value(Kind::BoolValue(true))),
			("nothing".to_string(), value(Kind::NullValue(0))),
			(
				"nested".to_string(),
				value(Kind::StructValue(prost_types::Struct::default())),
			),
		]);

		let metadata = struct_to_metadata(prost_types::Struct { fields });
		assert_eq!(metadata.len(), 4);
		assert_eq!(metadata["scope"], MetadataValue::from("app"));
		assert_eq!(metadata["version"], MetadataValue::Integer(3));
		assert_eq!(metadata["ratio"], MetadataValue::Double(0.25));
		assert_eq!(metadata["beta"], MetadataValue::Boolean(true));
	}

	#[test]
	fn test_sync_request_wire_format() {
		let request = SyncFlagsRequest {
			provider_id: "p".to_string(),
			selector: "s".to_string(),
		};
		let bytes = request.encode_to_vec();
		assert_eq!(bytes, vec![0x0a, 0x01, b'p', 0x12, 0x01, b's']);
	}

	#[test]
	fn test_response_without_context_decodes() {
		let bytes = SyncFlagsResponse {
			flag_configuration: "{}".to_string(),
			sync_context: None,
		}
		.encode_to_vec();

		let decoded = SyncFlagsResponse::decode(bytes.as_slice()).unwrap();
		assert_eq!(decoded.flag_configuration, "{}");
		assert!(decoded.sync_context.is_none());
	}
}

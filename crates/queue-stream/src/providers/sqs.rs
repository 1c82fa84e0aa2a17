//! AWS SQS queue service using the SQS query API over HTTP.
//!
//! Requests are form-encoded `POST`s signed with AWS Signature Version 4 and
//! responses are parsed from XML. Talking HTTP directly keeps the provider
//! testable against a mock server and lets the endpoint point at LocalStack
//! or any other SQS-compatible service.
//!
//! ## Operations
//!
//! | [`QueueService`] call | SQS action           |
//! |-----------------------|----------------------|
//! | `resolve_address`     | `GetQueueUrl`        |
//! | `receive`             | `ReceiveMessage`     |
//! | `delete_batch`        | `DeleteMessageBatch` |
//! | `send_batch`          | `SendMessageBatch`   |
//!
//! A batch response that lists any `BatchResultErrorEntry` fails the whole
//! call with [`QueueError::BatchEntriesFailed`].
//!
//! ## Authentication
//!
//! Static credentials come from [`SqsConfig`] or the standard
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` variables. Without
//! credentials every call fails with [`QueueError::AuthenticationFailed`].

use crate::config::SqsConfig;
use crate::error::{ConfigurationError, QueueError};
use crate::message::{DeleteEntry, Message, QueueAddress, QueueName, SendEntry};
use crate::service::QueueService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Largest batch accepted by `SendMessageBatch` and `DeleteMessageBatch`
pub const SQS_MAX_BATCH: usize = 10;

/// Message group used for writes to FIFO queues
pub const FIFO_MESSAGE_GROUP: &str = "queue-stream";

// ============================================================================
// Error Types
// ============================================================================

/// SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum SqsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("SQS service error: {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("{failed} of {total} entries failed: {message}")]
    BatchEntriesFailed {
        failed: usize,
        total: usize,
        message: String,
    },

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SqsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::ServiceError { .. } => true,
            Self::QueueNotFound(_) => false,
            Self::BatchEntriesFailed { .. } => true,
            Self::Signing(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map SQS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: "AwsSqs".to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::BatchEntriesFailed {
                failed,
                total,
                message,
            } => QueueError::BatchEntriesFailed {
                failed,
                total,
                message,
            },
            Self::Signing(message) => QueueError::AuthenticationFailed { message },
            Self::SerializationError(message) => QueueError::Serialization { message },
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a form-encoded `POST /` request
    ///
    /// Returns the headers to add to the request: `Authorization`,
    /// `x-amz-date` and `host`.
    fn sign_request(
        &self,
        host: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, SqsError> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical headers must be sorted by name
        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp)?;

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        Ok(vec![
            ("Authorization".to_string(), authorization_header),
            ("x-amz-date".to_string(), amz_date),
            ("host".to_string(), host.to_string()),
        ])
    }

    /// Derive the signing key through the HMAC chain and sign
    ///
    /// kSecret = "AWS4" + secret, then date, region, service and
    /// "aws4_request" are folded in before signing `string_to_sign`.
    fn calculate_signature(
        &self,
        string_to_sign: &str,
        date_stamp: &str,
    ) -> Result<String, SqsError> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes())?;

        Ok(hex::encode(signature))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SqsError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SqsError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

// ============================================================================
// SQS Queue Service
// ============================================================================

/// Queue service backed by AWS SQS
///
/// Cheap to share across tasks behind an `Arc`. The service holds no cache;
/// address caching happens in the stream adapter.
pub struct SqsQueueService {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    config: SqsConfig,
    endpoint: Url,
    host: String,
}

impl SqsQueueService {
    /// Create a service for the region and endpoint in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the region is empty, the endpoint is not an
    /// absolute URL, or the HTTP client cannot be built.
    pub fn new(config: SqsConfig) -> Result<Self, ConfigurationError> {
        if config.region.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "SQS region cannot be empty".to_string(),
            });
        }

        let endpoint = Url::parse(&config.endpoint()).map_err(|e| ConfigurationError::Invalid {
            message: format!("Invalid SQS endpoint '{}': {}", config.endpoint(), e),
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ConfigurationError::Invalid {
                    message: format!("SQS endpoint '{}' has no host", endpoint),
                })
            }
        };

        let signer = config.credentials().map(|(access_key, secret_key)| {
            AwsV4Signer::new(access_key, secret_key, config.region.clone())
        });
        if signer.is_none() {
            warn!(region = %config.region, "No SQS credentials configured, requests will fail");
        }

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer,
            config,
            endpoint,
            host,
        })
    }

    /// Send one signed action and return the response body
    async fn make_request(&self, params: &BTreeMap<String, String>) -> Result<String, SqsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| SqsError::Authentication("No credentials configured".to_string()))?;

        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let auth_headers = signer.sign_request(&self.host, &body, &Utc::now())?;

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header("content-type", "application/x-www-form-urlencoded");
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                SqsError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                SqsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| SqsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }

    fn action(&self, action: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        params
    }

    fn address_action(&self, action: &str, address: &QueueAddress) -> BTreeMap<String, String> {
        let mut params = self.action(action);
        params.insert("QueueUrl".to_string(), address.as_str().to_string());
        params
    }
}

impl fmt::Debug for SqsQueueService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsQueueService")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint.as_str())
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    #[instrument(skip_all, fields(queue = %queue))]
    async fn resolve_address(&self, queue: &QueueName) -> Result<QueueAddress, QueueError> {
        let mut params = self.action("GetQueueUrl");
        params.insert("QueueName".to_string(), queue.as_str().to_string());

        let response = self.make_request(&params).await.map_err(|e| match e {
            SqsError::QueueNotFound(_) => QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            },
            other => other.to_queue_error(),
        })?;

        let url = parse_queue_url_response(&response).map_err(SqsError::to_queue_error)?;
        debug!(queue_url = %url, "Resolved queue URL");
        Ok(QueueAddress::new(url))
    }

    #[instrument(skip_all, fields(queue = %address, max_messages = max_messages))]
    async fn receive(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Vec<Message>, QueueError> {
        let mut params = self.address_action("ReceiveMessage", address);
        params.insert(
            "MaxNumberOfMessages".to_string(),
            max_messages.clamp(1, SQS_MAX_BATCH as u32).to_string(),
        );
        params.insert(
            "VisibilityTimeout".to_string(),
            visibility_timeout_seconds.to_string(),
        );
        params.insert(
            "WaitTimeSeconds".to_string(),
            self.config.wait_time_seconds.min(20).to_string(),
        );

        let response = self
            .make_request(&params)
            .await
            .map_err(SqsError::to_queue_error)?;

        let messages =
            parse_receive_message_response(&response).map_err(SqsError::to_queue_error)?;
        debug!(received = messages.len(), "Received messages");
        Ok(messages)
    }

    #[instrument(skip_all, fields(queue = %address, batch_size = entries.len()))]
    async fn delete_batch(
        &self,
        address: &QueueAddress,
        entries: &[DeleteEntry],
    ) -> Result<(), QueueError> {
        if entries.is_empty() {
            return Ok(());
        }
        if entries.len() > SQS_MAX_BATCH {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: SQS_MAX_BATCH,
            });
        }

        let mut params = self.address_action("DeleteMessageBatch", address);
        for (idx, entry) in entries.iter().enumerate() {
            params.insert(
                format!("DeleteMessageBatchRequestEntry.{}.Id", idx + 1),
                entry.id.clone(),
            );
            params.insert(
                format!("DeleteMessageBatchRequestEntry.{}.ReceiptHandle", idx + 1),
                entry.receipt_token.clone(),
            );
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(SqsError::to_queue_error)?;

        check_batch_response(&response, entries.len()).map_err(SqsError::to_queue_error)
    }

    #[instrument(skip_all, fields(queue = %address, batch_size = entries.len()))]
    async fn send_batch(
        &self,
        address: &QueueAddress,
        entries: &[SendEntry],
    ) -> Result<(), QueueError> {
        if entries.is_empty() {
            return Ok(());
        }
        if entries.len() > SQS_MAX_BATCH {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: SQS_MAX_BATCH,
            });
        }

        let fifo = address.as_str().ends_with(".fifo");
        let mut params = self.address_action("SendMessageBatch", address);
        for (idx, entry) in entries.iter().enumerate() {
            let prefix = format!("SendMessageBatchRequestEntry.{}", idx + 1);
            params.insert(format!("{}.Id", prefix), entry.id.clone());
            params.insert(format!("{}.MessageBody", prefix), entry.body.clone());

            if fifo {
                params.insert(
                    format!("{}.MessageGroupId", prefix),
                    FIFO_MESSAGE_GROUP.to_string(),
                );
                // Every write is a distinct message, identical bodies included
                params.insert(
                    format!("{}.MessageDeduplicationId", prefix),
                    uuid::Uuid::new_v4().to_string(),
                );
            }
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(SqsError::to_queue_error)?;

        check_batch_response(&response, entries.len()).map_err(SqsError::to_queue_error)
    }

    fn max_batch_size(&self) -> usize {
        SQS_MAX_BATCH
    }
}

// ============================================================================
// XML Response Parsing
// ============================================================================

fn xml_error(e: impl fmt::Display) -> SqsError {
    SqsError::SerializationError(format!("XML parsing error: {}", e))
}

/// Parse GetQueueUrl XML response
fn parse_queue_url_response(xml: &str) -> Result<String, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_queue_url = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"QueueUrl" => {
                in_queue_url = true;
            }
            Ok(Event::Text(e)) if in_queue_url => {
                return e.unescape().map(|s| s.into_owned()).map_err(xml_error);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Err(SqsError::SerializationError(
        "QueueUrl not found in response".to_string(),
    ))
}

/// Parse an error response and classify it by code and status
fn parse_error_response(xml: &str, status_code: u16) -> SqsError {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| format!("HTTP{}", status_code));
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken" => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        _ if status_code == 401 || status_code == 403 => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        _ => SqsError::ServiceError { code, message },
    }
}

/// Fields of one message being parsed
#[derive(Default)]
struct MessageFields {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
}

#[derive(Clone, Copy)]
enum MessageField {
    MessageId,
    ReceiptHandle,
    Body,
}

/// Parse ReceiveMessage XML response
///
/// Text is not trimmed so message bodies keep their whitespace. Messages
/// without a receipt handle cannot be acknowledged and are skipped.
fn parse_receive_message_response(xml: &str) -> Result<Vec<Message>, SqsError> {
    let mut reader = Reader::from_str(xml);

    let mut messages = Vec::new();
    let mut current: Option<MessageFields> = None;
    let mut field: Option<MessageField> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" if current.is_none() => current = Some(MessageFields::default()),
                b"MessageId" if current.is_some() => field = Some(MessageField::MessageId),
                b"ReceiptHandle" if current.is_some() => {
                    field = Some(MessageField::ReceiptHandle)
                }
                b"Body" if current.is_some() => field = Some(MessageField::Body),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"Body" => {
                if let Some(fields) = current.as_mut() {
                    fields.body = Some(String::new());
                }
            }
            Ok(Event::Text(e)) if field.is_some() => {
                text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::CData(e)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if let (Some(which), Some(fields)) = (field, current.as_mut()) {
                    let value = std::mem::take(&mut text);
                    match (which, name.as_ref()) {
                        (MessageField::MessageId, b"MessageId") => fields.message_id = Some(value),
                        (MessageField::ReceiptHandle, b"ReceiptHandle") => {
                            fields.receipt_handle = Some(value)
                        }
                        (MessageField::Body, b"Body") => fields.body = Some(value),
                        _ => {}
                    }
                    field = None;
                } else if name.as_ref() == b"Message" {
                    if let Some(fields) = current.take() {
                        match fields.receipt_handle {
                            Some(receipt_handle) => messages.push(Message::new(
                                fields.message_id.unwrap_or_default(),
                                receipt_handle,
                                fields.body.unwrap_or_default(),
                            )),
                            None => warn!(
                                message_id = ?fields.message_id,
                                "Skipping received message without receipt handle"
                            ),
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// One failed entry of a batch response
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct BatchEntryFailure {
    id: String,
    code: String,
    message: String,
}

/// Parse the `BatchResultErrorEntry` elements of a batch response
fn parse_batch_failures(xml: &str) -> Result<Vec<BatchEntryFailure>, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut failures = Vec::new();
    let mut current: Option<BatchEntryFailure> = None;
    let mut element: Vec<u8> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if e.name().as_ref() == b"BatchResultErrorEntry" {
                    current = Some(BatchEntryFailure::default());
                } else {
                    element = e.name().as_ref().to_vec();
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(failure) = current.as_mut() {
                    let value = e.unescape().map_err(xml_error)?.into_owned();
                    match element.as_slice() {
                        b"Id" => failure.id = value,
                        b"Code" => failure.code = value,
                        b"Message" => failure.message = value,
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"BatchResultErrorEntry" {
                    if let Some(failure) = current.take() {
                        failures.push(failure);
                    }
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(failures)
}

/// Fail the whole batch if any entry failed
fn check_batch_response(xml: &str, total: usize) -> Result<(), SqsError> {
    let failures = parse_batch_failures(xml)?;
    let Some(first) = failures.first() else {
        return Ok(());
    };

    warn!(
        failed = failures.len(),
        total,
        code = %first.code,
        "Batch entries failed"
    );
    Err(SqsError::BatchEntriesFailed {
        failed: failures.len(),
        total,
        message: format!("entry {}: {} - {}", first.id, first.code, first.message),
    })
}

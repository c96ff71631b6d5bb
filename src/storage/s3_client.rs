//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access. Every write carries
//! the object's SSE-C key, checksum algorithm and storage class.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{
        ChecksumAlgorithm as SdkChecksumAlgorithm, CompletedMultipartUpload, CompletedPart,
        StorageClass,
    },
    Client,
};

use crate::config::StorageConfig;
use crate::crypto::ChecksumAlgorithm;
use crate::error::{Result, StorageError};

use super::backend::ObjectStorage;
use super::types::{ObjectRequest, PartTag, UploadedObject};

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client from configuration
    ///
    /// Static credentials are used when both keys are configured, otherwise
    /// the default AWS provider chain resolves them.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "coldvault");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder.region(Region::new(region));

        if let Some(endpoint) = &config.endpoint {
            // Required for MinIO and other S3-compatible services
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        tracing::info!(endpoint = ?config.endpoint, "S3 client initialized");

        Ok(Self { client })
    }
}

fn sdk_checksum(algorithm: ChecksumAlgorithm) -> SdkChecksumAlgorithm {
    match algorithm {
        ChecksumAlgorithm::Crc32 => SdkChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Sha256 => SdkChecksumAlgorithm::Sha256,
    }
}

fn sdk_error(action: &str, key: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::SdkError(format!("Failed to {} {}: {}", action, key, e))
}

#[async_trait::async_trait]
impl ObjectStorage for S3Client {
    async fn put_object(&self, request: &ObjectRequest, body: Vec<u8>) -> Result<UploadedObject> {
        let response = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .storage_class(StorageClass::from(request.storage_class.as_str()))
            .checksum_algorithm(sdk_checksum(request.checksum_algorithm))
            .sse_customer_algorithm(request.customer_key.algorithm.as_str())
            .sse_customer_key(&request.customer_key.key_b64)
            .sse_customer_key_md5(&request.customer_key.key_md5_b64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("put object", &request.key, e))?;

        Ok(UploadedObject {
            etag: response.e_tag().unwrap_or_default().to_string(),
            version_id: response.version_id().map(|s| s.to_string()),
        })
    }

    async fn create_multipart_upload(&self, request: &ObjectRequest) -> Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .storage_class(StorageClass::from(request.storage_class.as_str()))
            .checksum_algorithm(sdk_checksum(request.checksum_algorithm))
            .sse_customer_algorithm(request.customer_key.algorithm.as_str())
            .sse_customer_key(&request.customer_key.key_b64)
            .sse_customer_key_md5(&request.customer_key.key_md5_b64)
            .send()
            .await
            .map_err(|e| sdk_error("create multipart upload for", &request.key, e))?;

        let upload_id = response
            .upload_id()
            .ok_or(StorageError::MissingField("upload_id"))?;

        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<PartTag> {
        let response = self
            .client
            .upload_part()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .checksum_algorithm(sdk_checksum(request.checksum_algorithm))
            .sse_customer_algorithm(request.customer_key.algorithm.as_str())
            .sse_customer_key(&request.customer_key.key_b64)
            .sse_customer_key_md5(&request.customer_key.key_md5_b64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("upload part {} of", part_number), &request.key, e))?;

        let checksum = match request.checksum_algorithm {
            ChecksumAlgorithm::Crc32 => response.checksum_crc32(),
            ChecksumAlgorithm::Sha256 => response.checksum_sha256(),
        };

        Ok(PartTag {
            part_number,
            etag: response.e_tag().unwrap_or_default().to_string(),
            checksum: checksum.map(|s| s.to_string()),
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        parts: &[PartTag],
    ) -> Result<UploadedObject> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                let builder = CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part.part_number);
                match request.checksum_algorithm {
                    ChecksumAlgorithm::Crc32 => builder.set_checksum_crc32(part.checksum.clone()),
                    ChecksumAlgorithm::Sha256 => builder.set_checksum_sha256(part.checksum.clone()),
                }
                .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(upload_id)
            .sse_customer_algorithm(request.customer_key.algorithm.as_str())
            .sse_customer_key(&request.customer_key.key_b64)
            .sse_customer_key_md5(&request.customer_key.key_md5_b64)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| sdk_error("complete multipart upload for", &request.key, e))?;

        Ok(UploadedObject {
            etag: response.e_tag().unwrap_or_default().to_string(),
            version_id: response.version_id().map(|s| s.to_string()),
        })
    }

    async fn abort_multipart_upload(&self, request: &ObjectRequest, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error("abort multipart upload for", &request.key, e))?;

        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("delete object", key, e))?;

        Ok(())
    }
}

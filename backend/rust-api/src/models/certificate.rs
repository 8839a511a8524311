use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::bson_datetime_as_chrono;

/// Proof of completion; at most one per (user, course).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub course_id: ObjectId,
    #[serde(with = "bson_datetime_as_chrono")]
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CertificateResponse {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub course_title: Option<String>,
    pub course_icon: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl CertificateResponse {
    pub fn new(certificate: Certificate, course_title: Option<String>, course_icon: Option<String>) -> Self {
        CertificateResponse {
            id: certificate.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: certificate.user_id.to_hex(),
            course_id: certificate.course_id.to_hex(),
            course_title,
            course_icon,
            issued_at: certificate.issued_at,
        }
    }
}

/// POST /api/certificates/courses/{id}/claim
#[derive(Debug, Serialize)]
pub struct ClaimCertificateResponse {
    pub certificate: Option<CertificateResponse>,
}

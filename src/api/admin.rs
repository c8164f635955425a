// src/api/admin.rs
//
// Operator endpoints. Every handler checks the operator secret before it
// touches the store.

use actix_web::{get, web, HttpRequest, HttpResponse};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;

use crate::api::admin_key;
use crate::error::PaymentError;
use crate::lifecycle::PENDING_LIMIT;
use crate::models::{ClaimFilter, ClaimPage, PaymentClaim, PaymentStats, PaymentStatus};
use crate::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    pub page: Option<u32>,
    #[serde(alias = "limit")]
    pub page_size: Option<u32>,
    /// A status name, or `all`.
    pub status: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    pub date_from: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`; a bare date covers the whole day.
    pub date_to: Option<String>,
    pub search: Option<String>,
}

#[derive(Clone, Copy)]
enum DayBound {
    Start,
    End,
}

fn parse_date(raw: &str, bound: DayBound) -> Result<DateTime<Utc>, PaymentError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| PaymentError::InvalidDate(raw.to_string()))?;
    let time = match bound {
        DayBound::Start => NaiveTime::MIN,
        DayBound::End => NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN),
    };
    Ok(day.and_time(time).and_utc())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ListQuery {
    pub fn into_filter(self) -> Result<ClaimFilter, PaymentError> {
        let defaults = ClaimFilter::default();

        let status = match non_empty(&self.status) {
            None => None,
            Some(s) if s.eq_ignore_ascii_case("all") => None,
            Some(s) => Some(
                s.to_lowercase()
                    .parse::<PaymentStatus>()
                    .map_err(PaymentError::InvalidStatus)?,
            ),
        };
        let date_from = non_empty(&self.date_from)
            .map(|d| parse_date(d, DayBound::Start))
            .transpose()?;
        let date_to = non_empty(&self.date_to)
            .map(|d| parse_date(d, DayBound::End))
            .transpose()?;

        Ok(ClaimFilter {
            status,
            date_from,
            date_to,
            search: non_empty(&self.search).map(str::to_string),
            page: self.page.unwrap_or(defaults.page),
            page_size: self.page_size.unwrap_or(defaults.page_size),
        })
    }
}

#[utoipa::path(
    get,
    path = "/api/payments/admin/stats",
    tag = "admin",
    params(("X-Admin-Key" = String, Header, description = "Operator secret")),
    responses(
        (status = 200, description = "Dashboard counters", body = PaymentStats),
        (status = 401, description = "Missing or wrong operator secret")
    )
)]
#[get("/api/payments/admin/stats")]
pub async fn payment_stats(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, PaymentError> {
    state.lifecycle.authorize(admin_key(&req))?;
    let stats = state.lifecycle.stats().await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "stats": stats,
    })))
}

#[utoipa::path(
    get,
    path = "/api/payments/admin/pending",
    tag = "admin",
    params(("X-Admin-Key" = String, Header, description = "Operator secret")),
    responses(
        (status = 200, description = "Pending claims, newest first"),
        (status = 401, description = "Missing or wrong operator secret")
    )
)]
#[get("/api/payments/admin/pending")]
pub async fn pending_payments(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, PaymentError> {
    state.lifecycle.authorize(admin_key(&req))?;
    let payments = state.lifecycle.pending(PENDING_LIMIT).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "payments": payments,
    })))
}

#[utoipa::path(
    get,
    path = "/api/payments/admin",
    tag = "admin",
    params(ListQuery, ("X-Admin-Key" = String, Header, description = "Operator secret")),
    responses(
        (status = 200, description = "One page of claims", body = ClaimPage),
        (status = 400, description = "Bad status or date"),
        (status = 401, description = "Missing or wrong operator secret")
    )
)]
#[get("/api/payments/admin")]
pub async fn list_payments(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, PaymentError> {
    state.lifecycle.authorize(admin_key(&req))?;
    let filter = query.into_inner().into_filter()?;
    let page = state.lifecycle.list_all(filter).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "payments": page.items,
        "pagination": {
            "total": page.total,
            "page": page.page,
            "pageSize": page.page_size,
            "pageCount": page.page_count,
        },
    })))
}

#[utoipa::path(
    get,
    path = "/api/payments/admin/{id}",
    tag = "admin",
    params(
        ("id" = String, Path, description = "Claim id"),
        ("X-Admin-Key" = String, Header, description = "Operator secret")
    ),
    responses(
        (status = 200, description = "The claim", body = PaymentClaim),
        (status = 401, description = "Missing or wrong operator secret"),
        (status = 404, description = "Unknown claim")
    )
)]
#[get("/api/payments/admin/{id}")]
pub async fn payment_by_id(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, PaymentError> {
    let payment = state.lifecycle.get_claim(&path, admin_key(&req)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "payment": payment,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_and_all_status() {
        let f = ListQuery {
            status: Some("all".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(f, ClaimFilter::default());
    }

    #[test]
    fn bare_date_to_covers_the_whole_day() {
        let f = ListQuery {
            date_from: Some("2024-03-01".into()),
            date_to: Some("2024-03-07".into()),
            status: Some("Pending".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(f.date_from, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let to = f.date_to.unwrap();
        assert!(to > Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap());
        assert!(to < Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap());
        assert_eq!(f.status, Some(PaymentStatus::Pending));
    }

    #[test]
    fn rfc3339_is_taken_as_is() {
        let f = ListQuery {
            date_to: Some("2024-03-07T12:00:00Z".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(f.date_to, Some(Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap()));
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let bad_status = ListQuery {
            status: Some("paid".into()),
            ..Default::default()
        };
        assert!(matches!(bad_status.into_filter(), Err(PaymentError::InvalidStatus(_))));
        let bad_date = ListQuery {
            date_from: Some("07/03/2024".into()),
            ..Default::default()
        };
        assert!(matches!(bad_date.into_filter(), Err(PaymentError::InvalidDate(_))));
    }
}

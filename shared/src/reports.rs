use crate::context::{ensure_same_organization, RequestContext};
use crate::contracts::{GetReportsResponse, PublishPartialReportRequest};
use crate::dynamo::{self, get_s, org_pk, report_sk, s, write_batches, Item};
use crate::error::ApiError;
use crate::responses::{BasicResponse, ErrorKey};
use crate::types::{ItemReport, ItemsByKey};
use crate::AppState;
use aws_sdk_dynamodb::types::{PutRequest, WriteRequest};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

pub fn report_date(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl ItemReport {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.product_id.trim().is_empty() {
            return Err(ApiError::validation(
                ErrorKey::InvalidReport,
                "productID is required",
            ));
        }
        if self.upi.trim().is_empty() {
            return Err(ApiError::validation(
                ErrorKey::InvalidReport,
                format!("UPI is required for product {}", self.product_id),
            ));
        }
        if !dynamo::is_valid_key_part(&self.product_id) || !dynamo::is_valid_key_part(&self.upi) {
            return Err(ApiError::validation(
                ErrorKey::InvalidReport,
                "productID and UPI must not contain '#'",
            ));
        }
        Ok(())
    }
}

fn report_from_record(record: &Item) -> Option<ItemReport> {
    Some(ItemReport {
        product_id: get_s(record, "productID")?,
        upi: get_s(record, "upi")?,
        location: get_s(record, "location").unwrap_or_default(),
        reported_by: get_s(record, "reportedBy"),
        report_date: get_s(record, "reportDate")?,
    })
}

fn report_to_record(organization_id: &str, report: &ItemReport) -> Item {
    let mut record = HashMap::new();
    record.insert("PK".to_string(), s(org_pk(organization_id)));
    record.insert(
        "SK".to_string(),
        s(report_sk(&report.report_date, &report.product_id, &report.upi)),
    );
    record.insert("productID".to_string(), s(report.product_id.clone()));
    record.insert("upi".to_string(), s(report.upi.clone()));
    record.insert("location".to_string(), s(report.location.clone()));
    record.insert("reportDate".to_string(), s(report.report_date.clone()));
    if let Some(by) = &report.reported_by {
        record.insert("reportedBy".to_string(), s(by.clone()));
    }
    record
}

pub fn group_by_date(reports: Vec<ItemReport>) -> ItemsByKey<ItemReport> {
    let mut grouped: ItemsByKey<ItemReport> = HashMap::new();
    for report in reports {
        grouped.entry(report.report_date.clone()).or_default().push(report);
    }
    grouped
}

/// Stamp incoming lines with date and reporter. A later line for the same
/// product and UPI replaces an earlier one.
pub fn prepare_reports(
    items: Vec<ItemReport>,
    date: &str,
    reporter: &str,
) -> Result<Vec<ItemReport>, ApiError> {
    let mut by_key: HashMap<(String, String), ItemReport> = HashMap::new();
    for mut report in items {
        report.validate()?;
        report.report_date = date.to_string();
        report.reported_by = Some(reporter.to_string());
        by_key.insert((report.product_id.clone(), report.upi.clone()), report);
    }
    let mut reports: Vec<ItemReport> = by_key.into_values().collect();
    reports.sort_by(|a, b| (&a.product_id, &a.upi).cmp(&(&b.product_id, &b.upi)));
    Ok(reports)
}

pub async fn publish_partial_report(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<BasicResponse, ApiError> {
    let req: PublishPartialReportRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;

    let date = report_date(Utc::now());
    let reports = prepare_reports(req.items, &date, ctx.user_id())?;

    let mut writes = Vec::with_capacity(reports.len());
    for report in &reports {
        let put = PutRequest::builder()
            .set_item(Some(report_to_record(&req.organization_id, report)))
            .build()
            .map_err(|e| ApiError::Upstream(format!("Failed to build put request: {}", e)))?;
        writes.push(WriteRequest::builder().put_request(put).build());
    }
    write_batches(&state.dynamo_client, &state.tables.reports, writes).await?;

    tracing::info!(
        "Published {} report lines for {} on {}",
        reports.len(),
        req.organization_id,
        date
    );
    Ok(BasicResponse::ok())
}

/// All reports, or one day's with `?date=YYYY-MM-DD`
pub async fn get_reports(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetReportsResponse, ApiError> {
    let organization_id = ctx.organization()?;
    let prefix = match ctx.query("date") {
        Some(date) => {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
                ApiError::validation(ErrorKey::InvalidReport, format!("Invalid date {}", date))
            })?;
            format!("REPORT#{}#", date)
        }
        None => "REPORT#".to_string(),
    };

    let records = dynamo::query_prefix(
        &state.dynamo_client,
        &state.tables.reports,
        &org_pk(organization_id),
        &prefix,
    )
    .await?;
    let reports = records.iter().filter_map(report_from_record).collect();

    Ok(GetReportsResponse {
        basic: BasicResponse::ok(),
        reports_by_date: group_by_date(reports),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(product: &str, upi: &str, location: &str) -> ItemReport {
        ItemReport {
            product_id: product.to_string(),
            upi: upi.to_string(),
            location: location.to_string(),
            reported_by: None,
            report_date: String::new(),
        }
    }

    #[test]
    fn test_report_date_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 0).unwrap();
        assert_eq!(report_date(now), "2024-03-07");
    }

    #[test]
    fn test_prepare_stamps_and_replaces() {
        let reports = prepare_reports(
            vec![
                report("p1", "a", "shelf 1"),
                report("p1", "b", "shelf 2"),
                report("p1", "a", "truck"),
            ],
            "2024-03-07",
            "u1",
        )
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].upi, "a");
        assert_eq!(reports[0].location, "truck");
        assert_eq!(reports[0].report_date, "2024-03-07");
        assert_eq!(reports[1].reported_by.as_deref(), Some("u1"));
    }

    #[test]
    fn test_prepare_rejects_missing_upi() {
        let err = prepare_reports(vec![report("p1", "", "x")], "2024-03-07", "u1").unwrap_err();
        assert_eq!(err.error_key(), ErrorKey::InvalidReport);
    }

    #[test]
    fn test_prepare_rejects_key_separator() {
        for (product, upi) in [("p1#x", "a"), ("p1", "a#b")] {
            let err =
                prepare_reports(vec![report(product, upi, "x")], "2024-03-07", "u1").unwrap_err();
            assert_eq!(err.error_key(), ErrorKey::InvalidReport);
        }
    }

    #[test]
    fn test_group_by_date() {
        let mut a = report("p1", "a", "x");
        a.report_date = "2024-03-06".to_string();
        let mut b = report("p1", "b", "x");
        b.report_date = "2024-03-07".to_string();
        let mut c = report("p2", "c", "x");
        c.report_date = "2024-03-07".to_string();

        let grouped = group_by_date(vec![a, b, c]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["2024-03-07"].len(), 2);
    }

    #[test]
    fn test_record_round_trip() {
        let mut r = report("p1", "a", "x");
        r.report_date = "2024-03-07".to_string();
        r.reported_by = Some("u1".to_string());
        let record = report_to_record("o1", &r);
        assert_eq!(get_s(&record, "SK").as_deref(), Some("REPORT#2024-03-07#p1#a"));
        assert_eq!(report_from_record(&record), Some(r));
    }
}

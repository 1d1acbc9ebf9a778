//! Public/school holiday sync (§4.6 "Holiday sync"). Grounded in
//! `original_source/backend/app/services/holiday_service.py`, shaped
//! against the OpenHolidaysAPI response format.

use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::storage::Storage;

pub const YEARLY_MONTH: u32 = 1;
pub const YEARLY_DAY: u32 = 2;
pub const YEARLY_WAKE_TIME: NaiveTime = NaiveTime::from_hms_opt(3, 30, 0).unwrap();

#[derive(Debug, Deserialize)]
struct PublicHoliday {
    #[serde(rename = "startDate")]
    start_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct SchoolHoliday {
    #[serde(rename = "startDate")]
    start_date: NaiveDate,
    #[serde(rename = "endDate")]
    end_date: NaiveDate,
}

/// Syncs public + school holidays for `year` into every family's
/// `day_type_overrides`, skipping any date that already has an
/// override for that family (manual overrides always win).
pub async fn run_for_year(storage: &Storage, config: &ServerConfig, year: i32) -> anyhow::Result<usize> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let public = fetch_public_holidays(&client, config, year).await.unwrap_or_default();
    let school = fetch_school_holidays(&client, config, year).await.unwrap_or_default();

    let now = Utc::now();
    let mut inserted = 0;

    for family in storage.list_families().await? {
        let family_id = Uuid::parse_str(&family.id)?;

        for holiday in &public {
            if storage
                .insert_day_type_override_if_absent(family_id, holiday.start_date, "holiday", None, "api", now)
                .await?
            {
                inserted += 1;
            }
        }

        for range in &school {
            let mut date = range.start_date;
            while date <= range.end_date {
                if storage
                    .insert_day_type_override_if_absent(family_id, date, "vacation", None, "api", now)
                    .await?
                {
                    inserted += 1;
                }
                date += chrono::Duration::days(1);
            }
        }
    }

    Ok(inserted)
}

async fn fetch_public_holidays(
    client: &reqwest::Client,
    config: &ServerConfig,
    year: i32,
) -> anyhow::Result<Vec<PublicHoliday>> {
    let url = format!(
        "{}/PublicHolidays?countryIsoCode={}&validFrom={year}-01-01&validTo={year}-12-31{}",
        config.holiday_api_base_url,
        config.holiday_country_code,
        subdivision_query(config),
    );
    Ok(client.get(url).send().await?.error_for_status()?.json().await?)
}

async fn fetch_school_holidays(
    client: &reqwest::Client,
    config: &ServerConfig,
    year: i32,
) -> anyhow::Result<Vec<SchoolHoliday>> {
    let url = format!(
        "{}/SchoolHolidays?countryIsoCode={}&validFrom={year}-01-01&validTo={year}-12-31{}",
        config.holiday_api_base_url,
        config.holiday_country_code,
        subdivision_query(config),
    );
    Ok(client.get(url).send().await?.error_for_status()?.json().await?)
}

fn subdivision_query(config: &ServerConfig) -> String {
    match &config.holiday_subdivision_code {
        Some(code) => format!("&subdivisionCode={code}"),
        None => String::new(),
    }
}

/// Startup + current/next year sync, called once before entering the
/// yearly wake loop.
pub async fn run_startup(storage: &Storage, config: &ServerConfig) -> anyhow::Result<usize> {
    let this_year = Utc::now().date_naive().year();
    let mut total = run_for_year(storage, config, this_year).await?;
    total += run_for_year(storage, config, this_year + 1).await?;
    Ok(total)
}

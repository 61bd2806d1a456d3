use crate::error::{AppError, Result};
use crate::models::analytics::{BucketRow, Granularity, TrendSeries};
use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// 趋势分桶：把 EventStore 返回的 (分组键, 计数) 行铺进定长数组。
/// 纯函数，`now` 由调用方传入，便于测试。
///
/// 对齐规则：
/// - 末位是当前桶，index 0 是窗口内最旧的桶，缺口补零；
/// - month/day 按距今的桶数倒排，落在窗口外的行直接丢弃；
/// - hour 是小时制映射（0-23 直接当下标），不按距今偏移；
/// - 解析不了的分组键跳过，不影响其它桶。
pub fn bucket(
    granularity: Granularity,
    horizon: usize,
    rows: &[BucketRow],
    now: DateTime<Utc>,
) -> Result<TrendSeries> {
    if horizon == 0 {
        return Err(AppError::Validation(
            "Trend horizon must be at least 1 bucket".to_string(),
        ));
    }

    let mut values = vec![0i64; horizon];
    for row in rows {
        if let Some(slot) = slot_for_key(granularity, horizon, &row.bucket_key, now) {
            // 分组键冲突说明上游分组有问题，这里按后写覆盖处理
            values[slot] = row.count;
        }
    }

    Ok(TrendSeries {
        granularity,
        length: horizon,
        values,
    })
}

/// 降级兜底用的全零序列
pub fn empty(granularity: Granularity, horizon: usize) -> TrendSeries {
    TrendSeries {
        granularity,
        length: horizon,
        values: vec![0; horizon],
    }
}

fn slot_for_key(
    granularity: Granularity,
    horizon: usize,
    key: &str,
    now: DateTime<Utc>,
) -> Option<usize> {
    match granularity {
        Granularity::Hour => {
            let hour: usize = key.trim().parse().ok()?;
            (hour < horizon).then_some(hour)
        }
        Granularity::Month => {
            let (year, month) = parse_year_month(key)?;
            let months_ago =
                (now.year() - year) as i64 * 12 + (now.month() as i64 - month as i64);
            slot_from_age(months_ago, horizon)
        }
        Granularity::Day => {
            let date = NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d").ok()?;
            // 两边都先截到日历日再相减，避免跨时段的不足一天偏差
            let days_ago = (now.date_naive() - date).num_days();
            slot_from_age(days_ago, horizon)
        }
    }
}

fn slot_from_age(age: i64, horizon: usize) -> Option<usize> {
    if age >= 0 && (age as usize) < horizon {
        Some(horizon - 1 - age as usize)
    } else {
        None
    }
}

fn parse_year_month(key: &str) -> Option<(i32, u32)> {
    let (year, month) = key.trim().split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

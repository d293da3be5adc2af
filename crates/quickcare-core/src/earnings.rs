//! Earnings reporting for delivery partners.

use chrono::{DateTime, Utc};
use quickcare_types::{Delivery, DeliveryStatus, EarningsPeriod, EarningsSummary};
use rust_decimal::Decimal;

/// Sums the completed deliveries that fall inside `period`.
///
/// A delivery counts towards the period in which it was delivered. Undelivered
/// records are ignored.
pub fn summarize(deliveries: &[Delivery], period: EarningsPeriod, now: DateTime<Utc>) -> EarningsSummary {
	let since = period.since(now);
	let completed: Vec<&Delivery> = deliveries
		.iter()
		.filter(|d| d.status == DeliveryStatus::Delivered)
		.filter(|d| match (since, d.delivered_at) {
			(None, _) => true,
			(Some(since), Some(at)) => at >= since,
			(Some(_), None) => false,
		})
		.collect();

	let base_earnings: Decimal = completed.iter().map(|d| d.earnings).sum();
	let tips: Decimal = completed.iter().map(|d| d.tip).sum();
	let bonuses: Decimal = completed.iter().map(|d| d.bonus).sum();
	let total = base_earnings + tips + bonuses;
	let average_per_delivery = if completed.is_empty() {
		Decimal::ZERO
	} else {
		(total / Decimal::from(completed.len())).round_dp(2)
	};

	EarningsSummary {
		period,
		deliveries: completed.len(),
		base_earnings,
		tips,
		bonuses,
		total,
		average_per_delivery,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	fn delivered(earnings: i64, tip: i64, bonus: i64, at: DateTime<Utc>) -> Delivery {
		Delivery {
			order_id: quickcare_types::new_id(),
			delivery_partner_id: "rider-1".into(),
			status: DeliveryStatus::Delivered,
			earnings: Decimal::from(earnings),
			tip: Decimal::from(tip),
			bonus: Decimal::from(bonus),
			estimated_delivery_at: None,
			assigned_at: at,
			updated_at: at,
			delivered_at: Some(at),
		}
	}

	#[test]
	fn test_total_is_fee_plus_tip_plus_bonus() {
		let now = Utc::now();
		let deliveries = vec![delivered(25, 10, 0, now), delivered(50, 0, 15, now)];
		let summary = summarize(&deliveries, EarningsPeriod::All, now);

		assert_eq!(summary.deliveries, 2);
		assert_eq!(summary.base_earnings, Decimal::from(75));
		assert_eq!(summary.tips, Decimal::from(10));
		assert_eq!(summary.bonuses, Decimal::from(15));
		assert_eq!(summary.total, Decimal::from(100));
		assert_eq!(summary.average_per_delivery, Decimal::from(50));
	}

	#[test]
	fn test_period_window_and_pending_deliveries() {
		let now = Utc::now();
		let mut active = delivered(35, 0, 0, now);
		active.status = DeliveryStatus::InTransit;
		active.delivered_at = None;
		let deliveries = vec![
			delivered(25, 0, 0, now),
			delivered(25, 0, 0, now - Duration::days(10)),
			delivered(25, 0, 0, now - Duration::days(40)),
			active,
		];

		assert_eq!(summarize(&deliveries, EarningsPeriod::Week, now).deliveries, 1);
		assert_eq!(summarize(&deliveries, EarningsPeriod::Month, now).deliveries, 2);
		assert_eq!(summarize(&deliveries, EarningsPeriod::All, now).deliveries, 3);
	}

	#[test]
	fn test_empty_summary() {
		let summary = summarize(&[], EarningsPeriod::Today, Utc::now());
		assert_eq!(summary.total, Decimal::ZERO);
		assert_eq!(summary.average_per_delivery, Decimal::ZERO);
	}
}

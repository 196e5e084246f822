//! Charge computation for reservation creation.
//!
//! The membership ladder applies to the creator's own seat only: tiers 1-3
//! subtract a flat amount from the unit price, the Infinity tier makes the
//! seat free at most once per calendar date. Prepaying for all covers the
//! three other seats at the undiscounted unit price.

use payloads::{MembershipTier, PaymentChannel, ReservationType};
use rust_decimal::Decimal;
use rust_decimal::dec;

/// Flat discount for membership tiers 1-3.
pub const FLAT_MEMBER_DISCOUNT: Decimal = dec!(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeBreakdown {
    /// Amount to debit from the creator now; zero for on-site private
    /// bookings (paid at the desk) and free Infinity seats.
    pub amount_due: Decimal,
    /// The price recorded on the reservation row: the full prepaid total,
    /// or the plain unit price.
    pub recorded_total: Decimal,
    /// Whether the Infinity free seat was consumed by this charge.
    pub used_infinity: bool,
}

/// Compute what a reservation creation costs.
///
/// `infinity_available` is false once the creator has already used the
/// Infinity free seat on the requested date; the charge then falls back to
/// the undiscounted unit price.
pub fn effective_charge(
    tier: MembershipTier,
    unit_price: Decimal,
    reservation_type: ReservationType,
    payment_channel: PaymentChannel,
    pay_for_all: bool,
    infinity_available: bool,
) -> ChargeBreakdown {
    let used_infinity = tier.is_infinity() && infinity_available;

    let discounted_unit = if used_infinity {
        Decimal::ZERO
    } else if tier.has_flat_discount() {
        (unit_price - FLAT_MEMBER_DISCOUNT).max(Decimal::ZERO)
    } else {
        unit_price
    };

    let total = if pay_for_all {
        discounted_unit + dec!(3) * unit_price
    } else {
        discounted_unit
    };

    let skip_deduction = reservation_type == ReservationType::Private
        && payment_channel == PaymentChannel::Onsite;
    let amount_due = if skip_deduction { Decimal::ZERO } else { total };

    ChargeBreakdown {
        amount_due,
        recorded_total: if pay_for_all { total } else { unit_price },
        used_infinity,
    }
}

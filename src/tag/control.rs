//! Control Policy Table
//!
//! Reserved tag names whose presence on an object switches off a billing
//! behavior. The table is closed at compile time; billing code branches on
//! [`ControlTagKind`] values, never on strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A billing decision that control tags can suppress.
/// Every predicate defaults to `true` when no control tag says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPredicate {
    GenerateInvoice,
    ProcessPayment,
    EnforceOverdue,
}

impl BillingPredicate {
    pub const ALL: [BillingPredicate; 3] = [
        BillingPredicate::GenerateInvoice,
        BillingPredicate::ProcessPayment,
        BillingPredicate::EnforceOverdue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BillingPredicate::GenerateInvoice => "generate_invoice",
            BillingPredicate::ProcessPayment => "process_payment",
            BillingPredicate::EnforceOverdue => "enforce_overdue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlTagKind {
    AutoPayOff,
    AutoInvoicingOff,
    OverdueEnforcementOff,
    WrittenOff,
    ManualPay,
    Test,
}

/// Static policy row for one control kind.
struct ControlPolicy {
    name: &'static str,
    id: u128,
    description: &'static str,
    suppresses: &'static [BillingPredicate],
}

const POLICY_TABLE: [(ControlTagKind, ControlPolicy); 6] = [
    (
        ControlTagKind::AutoPayOff,
        ControlPolicy {
            name: "AUTO_PAY_OFF",
            id: 1,
            description: "Suspends payments until removed.",
            suppresses: &[BillingPredicate::ProcessPayment],
        },
    ),
    (
        ControlTagKind::AutoInvoicingOff,
        ControlPolicy {
            name: "AUTO_INVOICING_OFF",
            id: 2,
            description: "Suspends invoicing until removed.",
            suppresses: &[BillingPredicate::GenerateInvoice],
        },
    ),
    (
        ControlTagKind::OverdueEnforcementOff,
        ControlPolicy {
            name: "OVERDUE_ENFORCEMENT_OFF",
            id: 3,
            description: "Suspends overdue enforcement until removed.",
            suppresses: &[BillingPredicate::EnforceOverdue],
        },
    ),
    (
        ControlTagKind::WrittenOff,
        ControlPolicy {
            name: "WRITTEN_OFF",
            id: 4,
            description: "Balance was written off; overdue enforcement no longer applies.",
            suppresses: &[BillingPredicate::EnforceOverdue],
        },
    ),
    (
        ControlTagKind::ManualPay,
        ControlPolicy {
            name: "MANUAL_PAY",
            id: 5,
            description: "Payments are collected manually, never by the payment processor.",
            suppresses: &[BillingPredicate::ProcessPayment],
        },
    ),
    (
        ControlTagKind::Test,
        ControlPolicy {
            name: "TEST",
            id: 6,
            description: "Marks a test object. No billing effect.",
            suppresses: &[],
        },
    ),
];

impl ControlTagKind {
    pub const ALL: [ControlTagKind; 6] = [
        ControlTagKind::AutoPayOff,
        ControlTagKind::AutoInvoicingOff,
        ControlTagKind::OverdueEnforcementOff,
        ControlTagKind::WrittenOff,
        ControlTagKind::ManualPay,
        ControlTagKind::Test,
    ];

    fn policy(self) -> &'static ControlPolicy {
        // POLICY_TABLE is declared in the same order as ALL
        &POLICY_TABLE[self as usize].1
    }

    /// Reserved name used in the registry and in `tag_definition_name`.
    pub fn as_str(self) -> &'static str {
        self.policy().name
    }

    /// Stable definition id, identical across tenants and restarts.
    pub fn definition_id(self) -> Uuid {
        Uuid::from_u128(self.policy().id)
    }

    pub fn description(self) -> &'static str {
        self.policy().description
    }

    /// Predicate values forced by this kind. Only suppressions are listed.
    pub fn effects(self) -> impl Iterator<Item = (BillingPredicate, bool)> {
        self.policy().suppresses.iter().map(|p| (*p, false))
    }

    /// Value this kind forces on `predicate`, if it touches it at all.
    pub fn effect_on(self, predicate: BillingPredicate) -> Option<bool> {
        self.effects().find(|(p, _)| *p == predicate).map(|(_, v)| v)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ControlTagKind::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ControlTagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlTagKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlTagKind::from_name(s).ok_or_else(|| format!("unknown control tag '{}'", s))
    }
}

pub fn is_reserved_name(name: &str) -> bool {
    ControlTagKind::from_name(name).is_some()
}

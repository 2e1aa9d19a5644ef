//! Built-in venture financing term sheet schema

use super::{DocumentSchema, FieldSpec, SchemaError, SectionSpec, ValueType};

pub const TERM_SHEET_KIND: &str = "term_sheet";

pub const SECURITY_TYPES: &[&str] = &[
    "Series Seed Preferred Stock",
    "Series A Preferred Stock",
    "Series B Preferred Stock",
    "SAFE",
    "Convertible Note",
];

pub const PARTICIPATION_TYPES: &[&str] =
    &["non-participating", "participating", "capped participating"];

pub const ANTI_DILUTION_TYPES: &[&str] = &[
    "broad-based weighted average",
    "narrow-based weighted average",
    "full ratchet",
    "none",
];

pub const DIVIDEND_TYPES: &[&str] = &["non-cumulative", "cumulative", "none"];

pub const VESTING_FREQUENCIES: &[&str] = &["monthly", "quarterly", "annually"];

pub const ACCELERATION_TYPES: &[&str] = &["none", "single-trigger", "double-trigger"];

pub const OPTION_POOL_TIMINGS: &[&str] = &["pre-money", "post-money"];

pub const BINDING_STATUSES: &[&str] = &["non-binding", "binding"];

const YES_NO: &[&str] = &["true", "false"];

fn number(name: &str) -> FieldSpec {
    FieldSpec::new(name, ValueType::Number)
}

fn text(name: &str) -> FieldSpec {
    FieldSpec::new(name, ValueType::String)
}

fn choice(name: &str, options: &[&str]) -> FieldSpec {
    FieldSpec::new(name, ValueType::one_of(options))
}

pub fn term_sheet_schema() -> Result<DocumentSchema, SchemaError> {
    let sections = vec![
        SectionSpec::new(
            "parties",
            "PARTIES",
            vec![
                text("company_name").required().from_deal().hint("Legal company name"),
                text("company_jurisdiction")
                    .from_deal()
                    .hint("State of incorporation, e.g. Delaware"),
                FieldSpec::new("founders", ValueType::List)
                    .from_deal()
                    .hint("Founder names as a list"),
                text("lead_investor").from_deal().hint("Lead investor entity name"),
            ],
        ),
        SectionSpec::new(
            "deal_economics",
            "DEAL ECONOMICS",
            vec![
                text("round_type").from_deal().hint("Seed, Series A, Series B, ..."),
                number("investment_amount")
                    .required()
                    .from_deal()
                    .hint("Total investment in USD as a plain number, e.g. 5000000"),
                number("pre_money_valuation")
                    .required()
                    .from_deal()
                    .hint("USD as a plain number; firm policy section 2.1 lists ranges by round type"),
                choice("security_type", SECURITY_TYPES).required().from_deal(),
                number("price_per_share")
                    .from_deal()
                    .hint("USD per share; null if not specified"),
                number("target_ownership_pct")
                    .from_deal()
                    .hint("Percent as a number, e.g. 20; firm policy section 2.2 targets 15-20"),
                number("option_pool_pct")
                    .from_policy()
                    .hint("Percent as a number; firm policy section 2.3 requires at least 15"),
                choice("option_pool_timing", OPTION_POOL_TIMINGS).from_policy(),
            ],
        ),
        SectionSpec::new(
            "liquidation_terms",
            "LIQUIDATION TERMS",
            vec![
                number("liquidation_preference_multiple")
                    .required()
                    .from_policy()
                    .hint("Multiple as a number, e.g. 1; firm policy section 2.4: must be 1x, never above"),
                choice("participation_type", PARTICIPATION_TYPES)
                    .from_policy()
                    .hint("Firm policy section 2.4: always non-participating"),
                choice("dividend_type", DIVIDEND_TYPES).from_policy(),
                number("dividend_rate_pct")
                    .from_policy()
                    .hint("Percent per annum; firm policy section 2.5: 6 for deals under $5M"),
                choice("anti_dilution_type", ANTI_DILUTION_TYPES)
                    .from_policy()
                    .hint("Firm policy section 2.6: must be broad-based weighted average"),
            ],
        ),
        SectionSpec::new(
            "governance",
            "GOVERNANCE",
            vec![
                number("board_seats_total").from_deal().hint("Seat count"),
                number("board_seats_investor")
                    .from_policy()
                    .hint("Seat count; firm policy section 3.1"),
                number("board_seats_founder").from_deal().hint("Seat count"),
                number("board_seats_independent").from_deal().hint("Seat count, 0 if none"),
                choice("board_observer_rights", YES_NO)
                    .from_policy()
                    .hint("Firm policy section 3.1: always include observer rights"),
                choice("investor_consent_for_quorum", YES_NO).from_deal(),
                number("drag_along_threshold_pct")
                    .from_policy()
                    .hint("Percent; firm policy section 3.4"),
                choice("pro_rata_rights", YES_NO)
                    .from_policy()
                    .hint("Firm policy section 3.5"),
            ],
        ),
        SectionSpec::new(
            "founder_terms",
            "FOUNDER TERMS",
            vec![
                number("vesting_period_months")
                    .from_policy()
                    .hint("Months; firm policy section 4.1: 4 years = 48"),
                number("vesting_cliff_months")
                    .from_policy()
                    .hint("Months; firm policy section 4.1: 1 year cliff"),
                choice("vesting_frequency", VESTING_FREQUENCIES)
                    .from_policy()
                    .hint("Firm policy section 4.1: monthly"),
                choice("acceleration_type", ACCELERATION_TYPES)
                    .from_policy()
                    .hint("Firm policy section 4.1: single-trigger not permitted"),
                number("non_compete_months")
                    .from_policy()
                    .hint("Months; firm policy section 4.2: 12"),
                number("non_solicit_months")
                    .from_policy()
                    .hint("Months; firm policy section 4.2: 24"),
            ],
        ),
        SectionSpec::new(
            "transaction_terms",
            "TRANSACTION TERMS",
            vec![
                number("exclusivity_days")
                    .from_policy()
                    .hint("Days; firm policy section 5.1: 45"),
                number("legal_fee_cap")
                    .from_policy()
                    .hint("USD as a plain number; firm policy section 5.2: 25000 standard"),
                number("expected_closing_days").from_deal().hint("Days"),
                text("governing_law").from_deal().hint("State, e.g. Delaware"),
            ],
        ),
        SectionSpec::new(
            "signatures",
            "SIGNATURES",
            vec![
                FieldSpec::new("effective_date", ValueType::Date)
                    .from_deal()
                    .hint("YYYY-MM-DD"),
                text("company_signatory_name").from_deal(),
                text("company_signatory_title").from_deal(),
                text("investor_signatory_name").from_deal(),
                text("investor_signatory_title").from_deal(),
                choice("binding_status", BINDING_STATUSES)
                    .from_policy()
                    .hint("Term sheets are non-binding except exclusivity and confidentiality"),
            ],
        ),
    ];

    DocumentSchema::new(
        TERM_SHEET_KIND,
        "Term Sheet",
        sections,
        vec!["deal_model".to_string(), "firm_policy".to_string()],
    )
}

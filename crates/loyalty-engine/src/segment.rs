//! 人群条件
//!
//! 活动可以附带一个人群谓词，发放前对会员属性求值。
//! `all` 中的条件必须全部满足；`any` 非空时至少满足其一。
//!
//! ```json
//! {
//!   "all": [{"attribute": "age", "op": "GTE", "value": 18}],
//!   "any": [{"attribute": "city", "op": "IN", "value": ["Recife", "Olinda"]}]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Person;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentPredicate {
    #[serde(default)]
    pub all: Vec<SegmentCondition>,
    #[serde(default)]
    pub any: Vec<SegmentCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCondition {
    pub attribute: SegmentAttribute,
    pub op: SegmentOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentAttribute {
    Age,
    Gender,
    City,
    State,
    Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentOp {
    Eq,
    Ne,
    In,
    NotIn,
    Gte,
    Lte,
    Contains,
}

impl SegmentPredicate {
    pub fn matches(&self, person: &Person, now: DateTime<Utc>) -> bool {
        let all_ok = self.all.iter().all(|c| c.matches(person, now));
        let any_ok = self.any.is_empty() || self.any.iter().any(|c| c.matches(person, now));
        all_ok && any_ok
    }

    /// 校验条件的操作符与取值形状
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.all
            .iter()
            .chain(self.any.iter())
            .try_for_each(SegmentCondition::validate)
    }
}

impl SegmentCondition {
    pub fn matches(&self, person: &Person, now: DateTime<Utc>) -> bool {
        match self.attribute {
            SegmentAttribute::Age => match person.age_on(now.date_naive()) {
                Some(age) => self.compare_number(i64::from(age)),
                None => false,
            },
            SegmentAttribute::Gender => self.compare_text(person.gender.as_deref()),
            SegmentAttribute::City => self.compare_text(person.city.as_deref()),
            SegmentAttribute::State => self.compare_text(person.state.as_deref()),
            SegmentAttribute::Tags => self.compare_tags(&person.tags),
        }
    }

    fn compare_number(&self, actual: i64) -> bool {
        match self.op {
            SegmentOp::Eq => self.value.as_i64() == Some(actual),
            SegmentOp::Ne => self.value.as_i64().is_some_and(|v| v != actual),
            SegmentOp::Gte => self.value.as_i64().is_some_and(|v| actual >= v),
            SegmentOp::Lte => self.value.as_i64().is_some_and(|v| actual <= v),
            SegmentOp::In => numbers(&self.value).contains(&actual),
            SegmentOp::NotIn => !numbers(&self.value).contains(&actual),
            SegmentOp::Contains => false,
        }
    }

    fn compare_text(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        let eq = |s: &str| s.eq_ignore_ascii_case(actual.trim());
        match self.op {
            SegmentOp::Eq => self.value.as_str().is_some_and(eq),
            SegmentOp::Ne => self.value.as_str().is_some_and(|s| !eq(s)),
            SegmentOp::In => strings(&self.value).any(eq),
            SegmentOp::NotIn => !strings(&self.value).any(eq),
            SegmentOp::Gte | SegmentOp::Lte | SegmentOp::Contains => false,
        }
    }

    fn compare_tags(&self, tags: &[String]) -> bool {
        let has = |s: &str| tags.iter().any(|t| t.eq_ignore_ascii_case(s));
        match self.op {
            SegmentOp::Contains | SegmentOp::Eq => self.value.as_str().is_some_and(has),
            SegmentOp::Ne => self.value.as_str().is_some_and(|s| !has(s)),
            SegmentOp::In => strings(&self.value).any(has),
            SegmentOp::NotIn => !strings(&self.value).any(has),
            SegmentOp::Gte | SegmentOp::Lte => false,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let list_op = matches!(self.op, SegmentOp::In | SegmentOp::NotIn);
        let shape_ok = match (self.attribute, list_op) {
            (_, true) => self.value.is_array(),
            (SegmentAttribute::Age, false) => {
                self.value.is_i64() && self.op != SegmentOp::Contains
            }
            (SegmentAttribute::Tags, false) => {
                self.value.is_string() && !matches!(self.op, SegmentOp::Gte | SegmentOp::Lte)
            }
            (_, false) => {
                self.value.is_string()
                    && matches!(self.op, SegmentOp::Eq | SegmentOp::Ne)
            }
        };

        if shape_ok {
            Ok(())
        } else {
            Err(format!(
                "人群条件不合法: attribute={:?}, op={:?}, value={}",
                self.attribute, self.op, self.value
            ))
        }
    }
}

fn numbers(value: &Value) -> Vec<i64> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

fn strings(value: &Value) -> impl Iterator<Item = &str> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn person() -> Person {
        let mut p = Person::new("98765432100", "Bruno");
        p.birth_date = NaiveDate::from_ymd_opt(1990, 1, 1);
        p.gender = Some("M".to_string());
        p.city = Some("Recife".to_string());
        p.state = Some("PE".to_string());
        p.tags = vec!["vip".to_string(), "app".to_string()];
        p
    }

    fn cond(attribute: SegmentAttribute, op: SegmentOp, value: Value) -> SegmentCondition {
        SegmentCondition {
            attribute,
            op,
            value,
        }
    }

    #[test]
    fn test_empty_predicate_matches_everyone() {
        assert!(SegmentPredicate::default().matches(&person(), Utc::now()));
    }

    #[test]
    fn test_all_and_any() {
        let predicate = SegmentPredicate {
            all: vec![cond(SegmentAttribute::Age, SegmentOp::Gte, json!(18))],
            any: vec![
                cond(SegmentAttribute::City, SegmentOp::Eq, json!("Olinda")),
                cond(SegmentAttribute::Tags, SegmentOp::Contains, json!("VIP")),
            ],
        };
        assert!(predicate.matches(&person(), Utc::now()));

        let predicate = SegmentPredicate {
            all: vec![cond(SegmentAttribute::State, SegmentOp::In, json!(["SP", "RJ"]))],
            any: vec![],
        };
        assert!(!predicate.matches(&person(), Utc::now()));
    }

    #[test]
    fn test_missing_attribute_does_not_match() {
        let mut p = person();
        p.birth_date = None;
        let c = cond(SegmentAttribute::Age, SegmentOp::Lte, json!(99));
        assert!(!c.matches(&p, Utc::now()));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let bad = SegmentPredicate {
            all: vec![cond(SegmentAttribute::Age, SegmentOp::In, json!(18))],
            any: vec![],
        };
        assert!(bad.validate().is_err());

        let bad = SegmentPredicate {
            all: vec![cond(SegmentAttribute::City, SegmentOp::Gte, json!("A"))],
            any: vec![],
        };
        assert!(bad.validate().is_err());

        let ok = SegmentPredicate {
            all: vec![cond(SegmentAttribute::Tags, SegmentOp::NotIn, json!(["blocked"]))],
            any: vec![cond(SegmentAttribute::Gender, SegmentOp::Eq, json!("f"))],
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_json() {
        let predicate: SegmentPredicate = serde_json::from_value(json!({
            "all": [{"attribute": "tags", "op": "CONTAINS", "value": "app"}]
        }))
        .unwrap();
        assert_eq!(predicate.all.len(), 1);
        assert!(predicate.any.is_empty());
        assert!(predicate.matches(&person(), Utc::now()));
    }
}

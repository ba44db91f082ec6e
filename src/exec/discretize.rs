//! Fixed-step interval assignment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side { #[default] Left, Right }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelValue {
    /// Signed interval number relative to `origin`.
    #[default]
    Interval,
    /// Interval number multiplied by `step`.
    Border,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscretizeModel {
    pub origin: f64,
    pub step: f64,
    /// Which border of the interval labels it.
    pub label: Side,
    /// Which border belongs to the interval.
    pub closed: Side,
    pub label_value: LabelValue,
}

impl Default for DiscretizeModel {
    fn default() -> Self {
        Self { origin: 0.0, step: 1.0, label: Side::Left, closed: Side::Left, label_value: LabelValue::Interval }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Label { Interval(i64), Border(f64) }

impl DiscretizeModel {
    pub fn is_valid(&self) -> bool { self.step.is_finite() && self.step > 0.0 && self.origin.is_finite() }

    /// Interval label of `value`; `None` for non-finite input.
    pub fn assign(&self, value: f64) -> Option<Label> {
        if !value.is_finite() { return None; }
        let steps = (value - self.origin) / self.step;
        let mut left = steps.floor() as i64;
        let mut right = steps.ceil() as i64;
        if left == right {
            // value sits on a border
            match self.closed {
                Side::Left => right += 1,
                Side::Right => left -= 1,
            }
        }
        let n = match self.label { Side::Left => left, Side::Right => right };
        Some(match self.label_value {
            LabelValue::Interval => Label::Interval(n),
            LabelValue::Border => Label::Border(n as f64 * self.step),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intervals(m: &DiscretizeModel, vals: &[f64]) -> Vec<i64> {
        vals.iter().map(|v| match m.assign(*v) { Some(Label::Interval(n)) => n, other => panic!("{:?}", other) }).collect()
    }

    const VALUES: [f64; 9] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];

    #[test]
    fn left_closed_left_label() {
        let m = DiscretizeModel { origin: 5.0, step: 3.0, ..Default::default() };
        assert_eq!(intervals(&m, &VALUES), vec![-2, -1, -1, -1, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn right_closed_right_label() {
        let m = DiscretizeModel { origin: 5.0, step: 3.0, label: Side::Right, closed: Side::Right, ..Default::default() };
        assert_eq!(intervals(&m, &VALUES), vec![-1, -1, 0, 0, 0, 1, 1, 1, 2]);
    }

    #[test]
    fn border_labels() {
        let m = DiscretizeModel { step: 2.5, label_value: LabelValue::Border, ..Default::default() };
        assert_eq!(m.assign(6.0), Some(Label::Border(5.0)));
        assert_eq!(m.assign(f64::NAN), None);
    }

    #[test]
    fn model_from_json() {
        let m: DiscretizeModel = serde_json::from_str(r#"{"origin": 5, "step": 3, "closed": "right"}"#).unwrap();
        assert_eq!(m.closed, Side::Right);
        assert_eq!(m.label, Side::Left);
        assert!(m.is_valid());
        assert!(!DiscretizeModel { step: 0.0, ..Default::default() }.is_valid());
    }
}

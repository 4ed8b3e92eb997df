//! Transaction record for credit-card fraud scoring

use serde::{Deserialize, Serialize};

/// Number of anonymized `V*` components carried by a transaction.
pub const V_FEATURE_COUNT: usize = 28;

/// A single card transaction as received at the scoring boundary.
///
/// `Time` and `Amount` are required; the anonymized `V1..V28` components
/// default to 0.0 when omitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// Seconds elapsed since the reference instant of the dataset
    #[serde(rename = "Time")]
    pub time: f64,

    /// Transaction amount
    #[serde(rename = "Amount")]
    pub amount: f64,

    #[serde(rename = "V1", default)]
    pub v1: f64,

    #[serde(rename = "V2", default)]
    pub v2: f64,

    #[serde(rename = "V3", default)]
    pub v3: f64,

    #[serde(rename = "V4", default)]
    pub v4: f64,

    #[serde(rename = "V5", default)]
    pub v5: f64,

    #[serde(rename = "V6", default)]
    pub v6: f64,

    #[serde(rename = "V7", default)]
    pub v7: f64,

    #[serde(rename = "V8", default)]
    pub v8: f64,

    #[serde(rename = "V9", default)]
    pub v9: f64,

    #[serde(rename = "V10", default)]
    pub v10: f64,

    #[serde(rename = "V11", default)]
    pub v11: f64,

    #[serde(rename = "V12", default)]
    pub v12: f64,

    #[serde(rename = "V13", default)]
    pub v13: f64,

    #[serde(rename = "V14", default)]
    pub v14: f64,

    #[serde(rename = "V15", default)]
    pub v15: f64,

    #[serde(rename = "V16", default)]
    pub v16: f64,

    #[serde(rename = "V17", default)]
    pub v17: f64,

    #[serde(rename = "V18", default)]
    pub v18: f64,

    #[serde(rename = "V19", default)]
    pub v19: f64,

    #[serde(rename = "V20", default)]
    pub v20: f64,

    #[serde(rename = "V21", default)]
    pub v21: f64,

    #[serde(rename = "V22", default)]
    pub v22: f64,

    #[serde(rename = "V23", default)]
    pub v23: f64,

    #[serde(rename = "V24", default)]
    pub v24: f64,

    #[serde(rename = "V25", default)]
    pub v25: f64,

    #[serde(rename = "V26", default)]
    pub v26: f64,

    #[serde(rename = "V27", default)]
    pub v27: f64,

    #[serde(rename = "V28", default)]
    pub v28: f64,
}

impl Transaction {
    /// Create a transaction with all `V*` components at zero.
    pub fn new(time: f64, amount: f64) -> Self {
        Self {
            time,
            amount,
            ..Default::default()
        }
    }

    /// Set the `V{index}` component (1-based). Out-of-range indices are ignored.
    pub fn with_v(mut self, index: usize, value: f64) -> Self {
        match index {
            1 => self.v1 = value,
            2 => self.v2 = value,
            3 => self.v3 = value,
            4 => self.v4 = value,
            5 => self.v5 = value,
            6 => self.v6 = value,
            7 => self.v7 = value,
            8 => self.v8 = value,
            9 => self.v9 = value,
            10 => self.v10 = value,
            11 => self.v11 = value,
            12 => self.v12 = value,
            13 => self.v13 = value,
            14 => self.v14 = value,
            15 => self.v15 = value,
            16 => self.v16 = value,
            17 => self.v17 = value,
            18 => self.v18 = value,
            19 => self.v19 = value,
            20 => self.v20 = value,
            21 => self.v21 = value,
            22 => self.v22 = value,
            23 => self.v23 = value,
            24 => self.v24 = value,
            25 => self.v25 = value,
            26 => self.v26 = value,
            27 => self.v27 = value,
            28 => self.v28 = value,
            _ => {}
        }
        self
    }

    /// The `V1..V28` components in index order.
    pub fn v_values(&self) -> [f64; V_FEATURE_COUNT] {
        [
            self.v1,
            self.v2,
            self.v3,
            self.v4,
            self.v5,
            self.v6,
            self.v7,
            self.v8,
            self.v9,
            self.v10,
            self.v11,
            self.v12,
            self.v13,
            self.v14,
            self.v15,
            self.v16,
            self.v17,
            self.v18,
            self.v19,
            self.v20,
            self.v21,
            self.v22,
            self.v23,
            self.v24,
            self.v25,
            self.v26,
            self.v27,
            self.v28,
        ]
    }

    /// The `V{index}` component (1-based).
    pub fn v(&self, index: usize) -> Option<f64> {
        index
            .checked_sub(1)
            .and_then(|i| self.v_values().get(i).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_components_default_to_zero() {
        let tx: Transaction = serde_json::from_str(r#"{"Time": 3600.0, "Amount": 12.5, "V3": -1.25}"#).unwrap();

        assert_eq!(tx.time, 3600.0);
        assert_eq!(tx.amount, 12.5);
        assert_eq!(tx.v(3), Some(-1.25));
        assert_eq!(tx.v(1), Some(0.0));
        assert_eq!(tx.v(28), Some(0.0));
        assert_eq!(tx.v(0), None);
        assert_eq!(tx.v(29), None);
    }

    #[test]
    fn test_time_and_amount_required() {
        let missing_amount = serde_json::from_str::<Transaction>(r#"{"Time": 0.0}"#);
        assert!(missing_amount.is_err());

        let missing_time = serde_json::from_str::<Transaction>(r#"{"Amount": 1.0}"#);
        assert!(missing_time.is_err());
    }

    #[test]
    fn test_wire_names() {
        let tx = Transaction::new(10.0, 2.0).with_v(17, 0.5);
        let json = serde_json::to_value(tx).unwrap();

        assert_eq!(json["Time"], 10.0);
        assert_eq!(json["Amount"], 2.0);
        assert_eq!(json["V17"], 0.5);
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let canonical: Transaction =
            serde_json::from_str(r#"{"Time": 90.0, "Amount": 7.0, "V1": 1.5, "V14": -4.0, "V28": 0.25}"#).unwrap();
        let reordered: Transaction =
            serde_json::from_str(r#"{"V28": 0.25, "V14": -4.0, "Amount": 7.0, "V1": 1.5, "Time": 90.0}"#).unwrap();

        assert_eq!(canonical, reordered);
        assert_eq!(reordered.v(14), Some(-4.0));
        assert_eq!(reordered.time, 90.0);
    }
}

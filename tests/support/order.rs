use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub id: u32,
    pub customer: String,
    pub amount: f64,
}

impl OrderCreated {
    pub fn new(id: u32, customer: &str, amount: f64) -> Self {
        Self {
            id,
            customer: customer.to_string(),
            amount,
        }
    }

    pub fn json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantEvent {
    pub tenant: String,
    pub kind: String,
}

use async_trait::async_trait;
use flora_core::StoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sellable variant of a catalog item, priced separately from the base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVariant {
    pub code: String,
    pub price: Decimal,
}

/// What order creation needs to know about a product: display name plus
/// current pricing. Descriptions, media and the rest of the catalog live
/// with the catalog collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub base_price: Decimal,
    pub variants: Vec<ItemVariant>,
}

impl CatalogItem {
    /// Unit price for a variant code, falling back to the base price when
    /// the code is absent or unknown.
    pub fn unit_price(&self, variant_code: Option<&str>) -> Decimal {
        match variant_code {
            Some(code) => self
                .variants
                .iter()
                .find(|v| v.code == code)
                .map(|v| v.price)
                .unwrap_or(self.base_price),
            None => self.base_price,
        }
    }
}

/// Catalog collaborator. Item CRUD is managed elsewhere.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn get_item(&self, product_id: Uuid) -> Result<Option<CatalogItem>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> CatalogItem {
        CatalogItem {
            id: Uuid::new_v4(),
            name: "Peony bouquet".to_string(),
            base_price: Decimal::new(4500, 2),
            variants: vec![ItemVariant {
                code: "LARGE".to_string(),
                price: Decimal::new(6500, 2),
            }],
        }
    }

    #[test]
    fn variant_price_falls_back_to_base() {
        let item = item();
        assert_eq!(item.unit_price(Some("LARGE")), Decimal::new(6500, 2));
        assert_eq!(item.unit_price(Some("NO_SUCH")), Decimal::new(4500, 2));
        assert_eq!(item.unit_price(None), Decimal::new(4500, 2));
    }
}

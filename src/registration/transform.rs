//! Canonical-item to platform-payload transformation and response id
//! extraction.
//!
//! Both directions are pure functions: shaping never touches the network,
//! and missing-but-required fields fail before any call is made.

use serde_json::{Value, json};

use crate::errors::RegistrationError;
use crate::model::ProductItem;

/// Build the platform-neutral payload for an item. Name and a positive
/// price are required; everything else passes through as-is.
pub fn base_payload(item: &ProductItem) -> Result<Value, RegistrationError> {
    if item.name.trim().is_empty() {
        return Err(RegistrationError::InvalidItem {
            item_id: item.id.clone(),
            field: "name".to_string(),
        });
    }
    if !item.price.is_finite() || item.price <= 0.0 {
        return Err(RegistrationError::InvalidItem {
            item_id: item.id.clone(),
            field: "price".to_string(),
        });
    }

    Ok(json!({
        "name": item.name,
        "description": item.description,
        "price": item.price,
        "original_price": item.original_price,
        "stock_quantity": item.stock_quantity,
        "weight": item.weight,
        "category_id": item.category_id,
        "brand": item.brand,
        "main_image_url": item.main_image_url,
        "additional_images": item.additional_images,
        "attributes": item.attributes,
        "keywords": item.keywords,
        "tags": item.tags,
    }))
}

/// Shape the neutral payload for a specific platform's product-creation
/// API. Unknown platforms get the neutral shape unchanged.
pub fn shape_for_platform(platform: &str, base: &Value) -> Value {
    match platform {
        "coupang" => json!({
            "sellerProductName": base["name"],
            "displayProductName": base["name"],
            "salePrice": base["price"],
            "originalPrice": base["original_price"],
            "maximumBuyCount": base["stock_quantity"],
            "displayCategoryCode": base["category_id"],
            "brand": base["brand"],
            "images": images_list(base),
            "searchTags": base["keywords"],
            "attributes": base["attributes"],
            "contents": base["description"],
        }),
        "naver" => json!({
            "name": base["name"],
            "detailContent": base["description"],
            "salePrice": base["price"],
            "stockQuantity": base["stock_quantity"],
            "leafCategoryId": base["category_id"],
            "brandName": base["brand"],
            "representativeImage": {"url": base["main_image_url"]},
            "optionalImages": base["additional_images"],
            "sellerTags": base["tags"],
        }),
        "11st" => json!({
            "prdNm": base["name"],
            "selPrc": base["price"],
            "prdImage01": base["main_image_url"],
            "htmlDetail": base["description"],
            "prdStatCd": "01",
            "stockQty": base["stock_quantity"],
            "dispCtgrNo": base["category_id"],
            "brand": base["brand"],
        }),
        _ => base.clone(),
    }
}

fn images_list(base: &Value) -> Value {
    let mut images = Vec::new();
    if let Some(main) = base["main_image_url"].as_str() {
        images.push(json!({"imageType": "REPRESENTATION", "vendorPath": main}));
    }
    if let Some(extra) = base["additional_images"].as_array() {
        for url in extra {
            images.push(json!({"imageType": "DETAIL", "vendorPath": url}));
        }
    }
    Value::Array(images)
}

/// Extract the platform-assigned product id from a creation response.
/// Platform-specific keys are tried first, then common fallbacks, then a
/// nested `data` object. `None` means the response carried no id.
pub fn extract_product_id(platform: &str, response: &Value) -> Option<String> {
    let platform_keys: &[&str] = match platform {
        "coupang" => &["sellerProductId", "productId"],
        "naver" => &["originProductNo", "productNo"],
        "11st" => &["productNumber", "prdNo"],
        _ => &[],
    };
    let common_keys = ["productId", "product_id", "id"];

    for key in platform_keys.iter().chain(common_keys.iter()) {
        if let Some(id) = value_as_id(&response[key]) {
            return Some(id);
        }
    }
    if let Some(data) = response.get("data") {
        for key in platform_keys.iter().chain(common_keys.iter()) {
            if let Some(id) = value_as_id(&data[key]) {
                return Some(id);
            }
        }
    }
    None
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

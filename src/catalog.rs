//! Product and price mirroring.
//!
//! Provider calls are made without holding a pooled connection; the pool
//! is only touched for the short local reads and writes around them.

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result, msg};
use crate::models::{Plan, Price};
use crate::payments::{Expandable, StripeClient, StripePrice, StripeProduct};

/// Return the local mirror of `price_id`, fetching it (and its product,
/// when that is missing too) from the provider on first use.
pub async fn ensure_price(pool: &DbPool, client: &StripeClient, price_id: &str) -> Result<Price> {
    let existing = {
        let conn = pool.get()?;
        queries::get_price(&conn, price_id)?
    };
    if let Some(price) = existing {
        return Ok(price);
    }

    let remote = client.get_price(price_id).await.map_err(|e| match e {
        AppError::NotFound(_) => AppError::NotFound(msg::PRICE_NOT_FOUND.into()),
        other => other,
    })?;
    mirror_remote_price(pool, client, &remote).await
}

/// Mirror a price object the provider already sent (e.g. on a subscription
/// item), fetching its product when that is not mirrored yet.
pub async fn mirror_remote_price(
    pool: &DbPool,
    client: &StripeClient,
    price: &StripePrice,
) -> Result<Price> {
    let product = match price.product.as_ref() {
        Some(Expandable::Object(product)) => Some(product.as_ref().clone()),
        Some(Expandable::Id(product_id)) => {
            let known = {
                let conn = pool.get()?;
                queries::get_product(&conn, product_id)?.is_some()
            };
            if known {
                None
            } else {
                Some(client.get_product(product_id).await?)
            }
        }
        None => None,
    };

    let conn = pool.get()?;
    mirror_price(&conn, price, product.as_ref())
}

fn mirror_price(
    conn: &rusqlite::Connection,
    price: &StripePrice,
    product: Option<&StripeProduct>,
) -> Result<Price> {
    if let Some(product) = product {
        queries::upsert_product(conn, &product.to_upsert())?;
    }
    let price = queries::upsert_price(conn, &price.to_upsert())?;
    tracing::debug!("Mirrored price {} (product {:?})", price.id, price.product_id);
    Ok(price)
}

/// Mirror every active product and its default price.
/// Returns the number of products and prices written.
pub async fn sync_catalog(pool: &DbPool, client: &StripeClient) -> Result<(usize, usize)> {
    let products = client.list_active_products().await?;

    let mut prices = Vec::new();
    for product in &products {
        match product.default_price.as_ref() {
            Some(default_price) => match default_price.as_object() {
                Some(price) => prices.push(price.clone()),
                None => prices.push(client.get_price(default_price.id()).await?),
            },
            None => tracing::debug!("Product {} has no default price", product.id),
        }
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    for product in &products {
        queries::upsert_product(&tx, &product.to_upsert())?;
    }
    for price in &prices {
        queries::upsert_price(&tx, &price.to_upsert())?;
    }
    tx.commit()?;

    tracing::info!(
        "Catalog synced: {} products, {} prices",
        products.len(),
        prices.len()
    );
    Ok((products.len(), prices.len()))
}

/// Plans for the pricing page: live from the provider, falling back to the
/// local mirror when the provider is unreachable.
pub async fn list_plans(pool: &DbPool, client: &StripeClient) -> Result<Vec<Plan>> {
    match client.list_active_products().await {
        Ok(products) => {
            let mut plans: Vec<Plan> = products.iter().filter_map(plan_from_product).collect();
            Plan::sort(&mut plans);
            Ok(plans)
        }
        Err(e) => {
            tracing::warn!("Live catalog unavailable, serving local mirror: {}", e);
            let conn = pool.get()?;
            queries::list_active_plans(&conn)
        }
    }
}

fn plan_from_product(product: &StripeProduct) -> Option<Plan> {
    let price = product.default_price.as_ref()?.as_object()?;
    Some(Plan {
        product_id: product.id.clone(),
        name: product.name.clone(),
        description: product.description.clone(),
        price_id: price.id.clone(),
        unit_amount: price.unit_amount,
        currency: price.currency.clone(),
        interval: price.recurring.as_ref().map(|r| r.interval.clone()),
    })
}

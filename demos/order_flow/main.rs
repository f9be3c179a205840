//! Order flow walkthrough against the in-memory store
//!
//! This example demonstrates:
//! - Seeding stock rows and a cart
//! - Two customers racing for the last units of a product
//! - A batch correction where one item targets a missing row
//! - Serving the same state over HTTP (pass `--serve`)

use stockpile::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("📦 Stockpile Order Flow Example");
    println!("===============================\n");

    let store = Arc::new(InMemoryStore::new());
    let ledger = StockLedger::new(store.clone());
    let orders = OrderService::new(store.clone());

    ledger
        .create(NewStock {
            warehouse_id: 1,
            product_id: 7,
            quantity: 10,
        })
        .await?;
    ledger
        .create(NewStock {
            warehouse_id: 1,
            product_id: 8,
            quantity: 50,
        })
        .await?;
    println!("✅ Warehouse 1 stocked: product 7 x10, product 8 x50\n");

    let mut carts = Vec::new();
    for user_id in [1, 2] {
        let cart = store.create_cart(user_id, 1).await?;
        store
            .add_cart_item(
                cart.id,
                NewCartItem {
                    product_id: 7,
                    quantity: 6,
                    sub_total: "59.94".parse()?,
                },
            )
            .await?;
        store
            .add_cart_item(
                cart.id,
                NewCartItem {
                    product_id: 8,
                    quantity: 1,
                    sub_total: "4.05".parse()?,
                },
            )
            .await?;
        carts.push((user_id, cart.id));
    }

    println!("🏁 Two customers order 6 units of product 7 at the same time...");
    let request = |user_id, cart_id| CreateOrderRequest {
        user_id,
        cart_id,
        status: OrderStatus::Pending,
        shipping_cost: Decimal::new(499, 2),
    };
    let (first, second) = tokio::join!(
        orders.create_order(request(carts[0].0, carts[0].1)),
        orders.create_order(request(carts[1].0, carts[1].1)),
    );
    for (user_id, outcome) in [(1, first), (2, second)] {
        match outcome {
            Ok(placed) => println!(
                "   user {}: order {} placed, total {} + shipping {}",
                user_id, placed.order.id, placed.order.total_price, placed.order.shipping_cost
            ),
            Err(e) => println!("   user {}: rejected ({})", user_id, e),
        }
    }
    let remaining = ledger.get(StockKey::new(1, 7)).await?;
    println!("   product 7 left in warehouse 1: {}\n", remaining.quantity);

    println!("🛠  Batch correction with one missing row...");
    let report = BatchUpdater::new(4)
        .batch_update_stock(
            &ledger,
            vec![
                StockUpdate {
                    warehouse_id: 1,
                    product_id: 7,
                    quantity: 20,
                },
                StockUpdate {
                    warehouse_id: 1,
                    product_id: 999,
                    quantity: 5,
                },
            ],
            &CancellationToken::new(),
        )
        .await?;
    println!("{}\n", serde_json::to_string_pretty(&report)?);

    if std::env::args().any(|arg| arg == "--serve") {
        let state = AppState::new(store);
        println!("🌐 Serving on http://127.0.0.1:8080");
        println!("   curl 'http://127.0.0.1:8080/orders?user_id=1'");
        println!("   curl http://127.0.0.1:8080/warehouses/1/stocks");
        serve(state, "127.0.0.1:8080").await?;
    }

    Ok(())
}

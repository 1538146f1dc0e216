//! Order lifecycle engine.

use chrono::Utc;
use common::{Identity, OrderId};
use serde_json::json;
use store::{TransactionManager, TransactionalStore};

use crate::error::DomainError;
use crate::identity::require_identity;
use crate::repository::{CatalogRepository, OrderRepository};

use super::{CreateOrder, ItemSource, Money, NewOrder, NewOrderItem, Order, OrderStatus, RequestedItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionKind {
    Update,
    Cancel,
}

/// Service for creating orders and moving them through their lifecycle.
///
/// Every operation takes the caller's scope (`None` or the handle of an
/// enclosing unit of work) so it can be composed into larger units of work,
/// and the resolved identity (`None` is rejected as unauthorized).
pub struct OrderService<S: TransactionalStore> {
    tm: TransactionManager<S>,
}

impl<S: TransactionalStore> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            tm: self.tm.clone(),
        }
    }
}

impl<S> OrderService<S>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    /// Creates a new order service running on the given transaction manager.
    pub fn new(tm: TransactionManager<S>) -> Self {
        Self { tm }
    }

    pub fn transaction_manager(&self) -> &TransactionManager<S> {
        &self.tm
    }

    /// Validates, prices and persists a new order with all of its items.
    ///
    /// Prices and names are snapshotted from the catalog. Any failure leaves
    /// neither the order nor any of its items behind.
    #[tracing::instrument(skip(self, scope, cmd), fields(items = cmd.items.len()))]
    pub async fn create_order(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        cmd: CreateOrder,
    ) -> Result<Order, DomainError> {
        let identity = require_identity(identity)?;
        let now = Utc::now();
        let delivery_date = cmd.validate(now)?;

        let order = self
            .tm
            .run_in_transaction(scope, move |tx| {
                Box::pin(async move {
                    let mut items = Vec::with_capacity(cmd.items.len());
                    for requested in cmd.items {
                        items.push(price_item(tx, requested).await?);
                    }

                    let order = NewOrder::assemble(
                        identity.user_id,
                        cmd.delivery_address,
                        delivery_date,
                        cmd.delivery_notes,
                        cmd.payment_method,
                        items,
                    )?;
                    order.validate()?;

                    let id = tx.insert_order(&order, now).await?;
                    let mut stored = Vec::with_capacity(order.items.len());
                    for item in &order.items {
                        stored.push(tx.insert_order_item(id, item).await?);
                    }

                    Ok::<_, DomainError>(order.into_order(id, stored, now))
                })
            })
            .await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            total = %order.total,
            "order created"
        );

        Ok(order)
    }

    /// Loads an order the caller owns, or any order for a privileged caller.
    #[tracing::instrument(skip(self, scope))]
    pub async fn get_order(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let identity = require_identity(identity)?;
        let mut handle = self.tm.current_handle(scope);

        let order = handle
            .find_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Order"))?;

        if !identity.can_act_for(order.user_id) {
            return Err(DomainError::forbidden());
        }
        Ok(order)
    }

    /// Lists the caller's orders, or every order for a privileged caller.
    #[tracing::instrument(skip(self, scope))]
    pub async fn list_orders(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
    ) -> Result<Vec<Order>, DomainError> {
        let identity = require_identity(identity)?;
        let owner = (!identity.role.is_privileged()).then_some(identity.user_id);

        let mut handle = self.tm.current_handle(scope);
        Ok(handle.list_orders(owner).await?)
    }

    /// Moves an order along one edge of the status graph.
    #[tracing::instrument(skip(self, scope))]
    pub async fn update_status(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<Order, DomainError> {
        let identity = require_identity(identity)?;
        self.transition(scope, identity, order_id, target, TransitionKind::Update)
            .await
    }

    /// Cancels a pending or paid order.
    #[tracing::instrument(skip(self, scope))]
    pub async fn cancel(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let identity = require_identity(identity)?;
        let order = self
            .transition(
                scope,
                identity,
                order_id,
                OrderStatus::Cancelled,
                TransitionKind::Cancel,
            )
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        Ok(order)
    }

    async fn transition(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Identity,
        order_id: OrderId,
        target: OrderStatus,
        kind: TransitionKind,
    ) -> Result<Order, DomainError> {
        let (order, from) = self
            .tm
            .run_in_transaction(scope, move |tx| {
                Box::pin(async move {
                    apply_transition(tx, identity, order_id, target, kind).await
                })
            })
            .await?;

        metrics::counter!(
            "order_status_transitions_total",
            "from" => from.as_str(),
            "to" => target.as_str()
        )
        .increment(1);
        tracing::info!(order_id = %order_id, %from, to = %target, "order status changed");

        Ok(order)
    }
}

/// Resolves the referenced catalog entity and snapshots its price and name.
async fn price_item<H>(tx: &mut H, requested: RequestedItem) -> Result<NewOrderItem, DomainError>
where
    H: CatalogRepository,
{
    let (price, name) = match requested.source {
        ItemSource::Meal(id) => {
            let meal = tx
                .find_meal(id)
                .await?
                .ok_or_else(|| DomainError::not_found(requested.source.resource_name()))?;
            (meal.price, meal.name)
        }
        ItemSource::Menu(id) => {
            let menu = tx
                .find_menu(id)
                .await?
                .ok_or_else(|| DomainError::not_found(requested.source.resource_name()))?;
            let price = Money::checked_sum(tx.menu_meal_prices(id).await?)
                .ok_or_else(|| DomainError::invalid("menu price is too large"))?;
            (price, menu.name)
        }
    };

    Ok(NewOrderItem {
        source: requested.source,
        quantity: requested.quantity,
        price,
        name,
        notes: requested.notes,
    })
}

async fn apply_transition<H>(
    tx: &mut H,
    identity: Identity,
    order_id: OrderId,
    target: OrderStatus,
    kind: TransitionKind,
) -> Result<(Order, OrderStatus), DomainError>
where
    H: OrderRepository,
{
    let mut order = tx
        .find_order_for_update(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Order"))?;

    if !identity.can_act_for(order.user_id) {
        return Err(DomainError::forbidden());
    }

    let from = order.status;
    if kind == TransitionKind::Cancel && !from.can_cancel() {
        return Err(DomainError::invalid(format!(
            "order cannot be cancelled in status {from}"
        )));
    }
    if from.is_terminal() {
        return Err(DomainError::invalid(format!(
            "order is already {from} and can no longer change"
        )));
    }
    if !from.can_transition_to(target) {
        return Err(DomainError::invalid(format!(
            "invalid status transition from {from} to {target}"
        )));
    }

    let now = Utc::now();
    if !tx.update_order_status(order_id, from, target, now).await? {
        return Err(DomainError::conflict(
            "order status was changed by another request",
            Some(json!({ "order_id": order_id, "expected_status": from })),
        ));
    }

    order.status = target;
    order.updated_at = now;
    Ok((order, from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewMeal;
    use crate::ErrorKind;
    use chrono::Duration;
    use common::MealId;
    use store::MemoryStore;

    async fn setup() -> (MemoryStore, OrderService<MemoryStore>, MealId) {
        let store = MemoryStore::new();
        let mut handle = store.ambient();
        let meal = handle
            .insert_meal(&NewMeal::new("Lasagna", Money::from_cents(1299)), Utc::now())
            .await
            .unwrap();
        let service = OrderService::new(TransactionManager::new(store.clone()));
        (store, service, meal.id)
    }

    fn request(meal: MealId, quantity: i32) -> CreateOrder {
        CreateOrder::new("1 Main St", Utc::now() + Duration::days(1))
            .with_item(RequestedItem::new(ItemSource::Meal(meal), quantity))
    }

    #[tokio::test]
    async fn create_order_requires_identity() {
        let (store, service, meal) = setup().await;

        let err = service
            .create_order(None, None, request(meal, 1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(store.row_count("orders").await, 0);
    }

    #[tokio::test]
    async fn create_order_snapshots_price_and_name() {
        let (_, service, meal) = setup().await;

        let order = service
            .create_order(None, Some(Identity::customer(7)), request(meal, 2))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total.cents(), 2598);
        assert_eq!(order.items[0].name, "Lasagna");
        assert_eq!(order.items[0].price.cents(), 1299);
        assert_eq!(Some(order.total), order.items_total());
    }

    #[tokio::test]
    async fn missing_meal_aborts_whole_order() {
        let (store, service, meal) = setup().await;
        let cmd = request(meal, 1).with_item(RequestedItem::new(ItemSource::Meal(MealId::new(999)), 1));

        let err = service
            .create_order(None, Some(Identity::customer(7)), cmd)
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::NotFound { ref resource } if resource == "Meal"));
        assert_eq!(store.row_count("orders").await, 0);
        assert_eq!(store.row_count("order_items").await, 0);
    }

    #[tokio::test]
    async fn cancel_runs_both_checks() {
        let (_, service, meal) = setup().await;
        let owner = Some(Identity::customer(7));
        let order = service.create_order(None, owner, request(meal, 1)).await.unwrap();

        service
            .update_status(None, owner, order.id, OrderStatus::Paid)
            .await
            .unwrap();
        service
            .update_status(None, owner, order.id, OrderStatus::Preparing)
            .await
            .unwrap();

        let err = service.cancel(None, owner, order.id).await.unwrap_err();
        assert!(err.to_string().contains("cannot be cancelled"));
    }

    #[tokio::test]
    async fn terminal_orders_no_longer_change() {
        let (_, service, meal) = setup().await;
        let owner = Some(Identity::customer(7));
        let order = service.create_order(None, owner, request(meal, 1)).await.unwrap();
        service.cancel(None, owner, order.id).await.unwrap();

        let err = service
            .update_status(None, Some(Identity::admin(1)), order.id, OrderStatus::Paid)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.public_message(), "order is already cancelled and can no longer change");
    }

    #[tokio::test]
    async fn overflowing_order_total_is_rejected() {
        let (store, service, _) = setup().await;
        let caviar = store
            .ambient()
            .insert_meal(&NewMeal::new("Caviar", Money::from_cents(i64::MAX / 2)), Utc::now())
            .await
            .unwrap();

        let err = service
            .create_order(None, Some(Identity::customer(7)), request(caviar.id, 3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.public_message(), "order total is too large");
        assert_eq!(store.row_count("orders").await, 0);
    }

    #[tokio::test]
    async fn list_orders_filters_by_owner_unless_privileged() {
        let (_, service, meal) = setup().await;
        service
            .create_order(None, Some(Identity::customer(7)), request(meal, 1))
            .await
            .unwrap();
        service
            .create_order(None, Some(Identity::customer(8)), request(meal, 1))
            .await
            .unwrap();

        let mine = service
            .list_orders(None, Some(Identity::customer(7)))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);

        let all = service.list_orders(None, Some(Identity::admin(1))).await.unwrap();
        assert_eq!(all.len(), 2);

        let driver = service
            .list_orders(None, Some(Identity::driver(9)))
            .await
            .unwrap();
        assert!(driver.is_empty());
    }
}

//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{CatalogRepository, CreateOrder, DomainError, Order, OrderRepository, UpdateStatus};
use store::TransactionalStore;

use crate::AppState;
use crate::error::ApiError;
use crate::identity::RequestContext;

/// Turns a body the extractor could not parse into a validation error.
pub(crate) fn parse_body<T>(
    ctx: &RequestContext,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ctx.error(DomainError::invalid(rejection.body_text())))
}

/// Turns a path id the extractor could not parse into a validation error.
pub(crate) fn parse_id(
    ctx: &RequestContext,
    path: Result<Path<i64>, PathRejection>,
) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ctx.error(DomainError::invalid(rejection.body_text())))
}

/// POST /orders: price and place a new order for the caller.
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn create<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    payload: Result<Json<CreateOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let cmd = parse_body(&ctx, payload)?;
    let order = state
        .orders
        .create_order(None, ctx.identity, cmd)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: the caller's orders, or every order for an admin.
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn list<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
) -> Result<Json<Vec<Order>>, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let orders = state
        .orders
        .list_orders(None, ctx.identity)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(orders))
}

/// GET /orders/{id}
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn get<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Order>, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let id = parse_id(&ctx, path)?;
    let order = state
        .orders
        .get_order(None, ctx.identity, OrderId::new(id))
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(order))
}

/// PUT /orders/{id}/status: move the order along one edge of the status graph.
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn update_status<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateStatus>, JsonRejection>,
) -> Result<Json<Order>, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let id = parse_id(&ctx, path)?;
    let UpdateStatus { status } = parse_body(&ctx, payload)?;
    let order = state
        .orders
        .update_status(None, ctx.identity, OrderId::new(id), status)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(order))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn cancel<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Order>, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let id = parse_id(&ctx, path)?;
    let order = state
        .orders
        .cancel(None, ctx.identity, OrderId::new(id))
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(order))
}

//! Admin catalog endpoints for meals and menus.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{MealId, MenuId};
use domain::{CatalogRepository, Meal, Menu, NewMeal, NewMenu, OrderRepository};
use store::TransactionalStore;

use super::orders::{parse_body, parse_id};
use crate::AppState;
use crate::error::ApiError;
use crate::identity::RequestContext;

/// POST /meals
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn create_meal<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    payload: Result<Json<NewMeal>, JsonRejection>,
) -> Result<(StatusCode, Json<Meal>), ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let meal = parse_body(&ctx, payload)?;
    let meal = state
        .catalog
        .create_meal(None, ctx.identity, meal)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok((StatusCode::CREATED, Json(meal)))
}

/// PUT /meals/{id}
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn update_meal<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NewMeal>, JsonRejection>,
) -> Result<Json<Meal>, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let id = parse_id(&ctx, path)?;
    let meal = parse_body(&ctx, payload)?;
    let meal = state
        .catalog
        .update_meal(None, ctx.identity, MealId::new(id), meal)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(meal))
}

/// DELETE /meals/{id}
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn delete_meal<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let id = parse_id(&ctx, path)?;
    state
        .catalog
        .delete_meal(None, ctx.identity, MealId::new(id))
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /menus
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn create_menu<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    payload: Result<Json<NewMenu>, JsonRejection>,
) -> Result<(StatusCode, Json<Menu>), ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let menu = parse_body(&ctx, payload)?;
    let menu = state
        .catalog
        .create_menu(None, ctx.identity, menu)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok((StatusCode::CREATED, Json(menu)))
}

/// PUT /menus/{id}: replace a menu and its meal links.
#[tracing::instrument(skip_all, fields(request_id = ctx.request_id.as_deref()))]
pub async fn update_menu<S>(
    State(state): State<Arc<AppState<S>>>,
    ctx: RequestContext,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NewMenu>, JsonRejection>,
) -> Result<Json<Menu>, ApiError>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let id = parse_id(&ctx, path)?;
    let menu = parse_body(&ctx, payload)?;
    let menu = state
        .catalog
        .update_menu(None, ctx.identity, MenuId::new(id), menu)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(menu))
}

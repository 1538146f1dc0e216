use chrono::Utc;
use common::{Identity, MealId, MenuId, Role};
use serde_json::json;
use store::{TransactionManager, TransactionalStore};

use crate::error::DomainError;
use crate::identity::require_identity;
use crate::repository::CatalogRepository;

use super::{Meal, Menu, NewMeal, NewMenu};

fn require_admin(identity: Option<Identity>) -> Result<Identity, DomainError> {
    let identity = require_identity(identity)?;
    if identity.role != Role::Admin {
        return Err(DomainError::forbidden());
    }
    Ok(identity)
}

/// Admin-only catalog mutations, each run as one unit of work.
pub struct CatalogService<S: TransactionalStore> {
    tm: TransactionManager<S>,
}

impl<S: TransactionalStore> Clone for CatalogService<S> {
    fn clone(&self) -> Self {
        Self {
            tm: self.tm.clone(),
        }
    }
}

impl<S> CatalogService<S>
where
    S: TransactionalStore,
    S::Handle: CatalogRepository,
{
    pub fn new(tm: TransactionManager<S>) -> Self {
        Self { tm }
    }

    #[tracing::instrument(skip(self, scope, meal), fields(name = %meal.name))]
    pub async fn create_meal(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        meal: NewMeal,
    ) -> Result<Meal, DomainError> {
        require_admin(identity)?;
        meal.validate()?;

        let meal = self
            .tm
            .run_in_transaction(scope, move |tx| {
                Box::pin(async move { Ok::<_, DomainError>(tx.insert_meal(&meal, Utc::now()).await?) })
            })
            .await?;

        tracing::info!(meal_id = %meal.id, "meal created");
        Ok(meal)
    }

    /// Updates a meal. Orders already placed keep the price they were sold at.
    #[tracing::instrument(skip(self, scope, meal))]
    pub async fn update_meal(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        meal_id: MealId,
        meal: NewMeal,
    ) -> Result<Meal, DomainError> {
        require_admin(identity)?;
        meal.validate()?;

        let meal = self
            .tm
            .run_in_transaction(scope, move |tx| {
                Box::pin(async move {
                    tx.update_meal(meal_id, &meal, Utc::now())
                        .await?
                        .ok_or_else(|| DomainError::not_found("Meal"))
                })
            })
            .await?;

        tracing::info!(meal_id = %meal.id, "meal updated");
        Ok(meal)
    }

    /// Deletes a meal that no menu offers.
    #[tracing::instrument(skip(self, scope))]
    pub async fn delete_meal(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        meal_id: MealId,
    ) -> Result<(), DomainError> {
        require_admin(identity)?;

        self.tm
            .run_without_result(scope, move |tx| {
                Box::pin(async move {
                    if tx.find_meal(meal_id).await?.is_none() {
                        return Err(DomainError::not_found("Meal"));
                    }

                    let menus = tx.menus_with_meal(meal_id).await?;
                    if !menus.is_empty() {
                        return Err(DomainError::conflict(
                            "meal is still offered by one or more menus",
                            Some(json!({ "menu_ids": menus })),
                        ));
                    }

                    tx.delete_meal(meal_id).await?;
                    Ok(())
                })
            })
            .await?;

        tracing::info!(%meal_id, "meal deleted");
        Ok(())
    }

    /// Creates a menu and its meal links together. A missing meal aborts the
    /// whole menu.
    #[tracing::instrument(skip(self, scope, menu), fields(name = %menu.name, meals = menu.meals.len()))]
    pub async fn create_menu(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        menu: NewMenu,
    ) -> Result<Menu, DomainError> {
        require_admin(identity)?;
        menu.validate()?;

        let menu = self
            .tm
            .run_in_transaction(scope, move |tx| {
                Box::pin(async move {
                    let now = Utc::now();
                    let id = tx.insert_menu(&menu, now).await?;
                    for link in &menu.meals {
                        if tx.find_meal(link.meal_id).await?.is_none() {
                            return Err(DomainError::not_found("Meal"));
                        }
                        tx.insert_menu_meal(id, link).await?;
                    }

                    Ok(Menu {
                        id,
                        name: menu.name,
                        week_start: menu.week_start,
                        week_end: menu.week_end,
                        meals: menu.meals,
                        created_at: now,
                    })
                })
            })
            .await?;

        tracing::info!(menu_id = %menu.id, "menu created");
        Ok(menu)
    }

    /// Replaces a menu's fields and its whole set of meal links. A missing
    /// meal leaves the menu exactly as it was.
    #[tracing::instrument(skip(self, scope, menu), fields(meals = menu.meals.len()))]
    pub async fn update_menu(
        &self,
        scope: Option<&mut S::Handle>,
        identity: Option<Identity>,
        menu_id: MenuId,
        menu: NewMenu,
    ) -> Result<Menu, DomainError> {
        require_admin(identity)?;
        menu.validate()?;

        let menu = self
            .tm
            .run_in_transaction(scope, move |tx| {
                Box::pin(async move {
                    if !tx.update_menu(menu_id, &menu).await? {
                        return Err(DomainError::not_found("Menu"));
                    }
                    let replaced = tx.delete_menu_meals(menu_id).await?;
                    tracing::debug!(replaced, "menu links removed");

                    for link in &menu.meals {
                        if tx.find_meal(link.meal_id).await?.is_none() {
                            return Err(DomainError::not_found("Meal"));
                        }
                        tx.insert_menu_meal(menu_id, link).await?;
                    }

                    tx.find_menu(menu_id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("Menu"))
                })
            })
            .await?;

        tracing::info!(menu_id = %menu.id, "menu updated");
        Ok(menu)
    }
}

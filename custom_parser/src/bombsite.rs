use serde::{Deserialize, Serialize};

use crate::{
    common::Vector,
    error::Result,
    serverclass::ServerClasses,
    subscription::{BindingContext, Subscriptions},
};

/// Axis-aligned volume of a trigger entity, such as a bomb site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxInformation {
    pub index: i32,
    pub min: Vector,
    pub max: Vector,
}

impl BoundingBoxInformation {
    pub fn contains(&self, point: Vector) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

pub(crate) fn bind_bomb_sites(classes: &ServerClasses, subs: &mut Subscriptions) {
    if let Some(idx) = classes.find_by_name("CCSPlayerResource") {
        subs.on_created(idx, bind_site_centers);
    }
    if let Some(idx) = classes.find_by_name("CBaseTrigger") {
        subs.on_created(idx, bind_trigger);
    }
}

fn bind_site_centers(ctx: &mut BindingContext<'_>) -> Result<()> {
    ctx.on_update("m_bombsiteCenterA", |ctx, u| {
        ctx.state.bombsite_a = u.vector()?;
        Ok(())
    });
    ctx.on_update("m_bombsiteCenterB", |ctx, u| {
        ctx.state.bombsite_b = u.vector()?;
        Ok(())
    });
    Ok(())
}

fn bind_trigger(ctx: &mut BindingContext<'_>) -> Result<()> {
    ctx.state.triggers.insert(
        ctx.entity_id,
        BoundingBoxInformation {
            index: ctx.entity_id,
            ..Default::default()
        },
    );

    ctx.on_update("m_Collision.m_vecMins", |ctx, u| {
        if let Some(t) = ctx.state.triggers.get_mut(&u.entity_id) {
            t.min = u.vector()?;
        }
        Ok(())
    });
    ctx.on_update("m_Collision.m_vecMaxs", |ctx, u| {
        if let Some(t) = ctx.state.triggers.get_mut(&u.entity_id) {
            t.max = u.vector()?;
        }
        Ok(())
    });
    Ok(())
}

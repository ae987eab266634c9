use ahash::AHashMap as HashMap;
use lazy_static::lazy_static;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    error::{check_capacity, Result},
    serverclass::{ServerClass, ServerClasses},
    subscription::{BindingContext, PropertyUpdate, Subscriptions},
    ParserError, MAX_ENTITIES,
};

const WEAPON_BASE: &str = "CWeaponCSBase";
const GUN_BASE: &str = "CWeaponCSBaseGun";
const GRENADE_BASE: &str = "CBaseCSGrenade";
const KNIFE_CLASS: &str = "CKnife";

const WEAPON_BASE_DEPTH: usize = 6;
const WEAPON_KIND_DEPTH: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EquipmentElement {
    #[default]
    Unknown = 0,

    // Pistols
    P2000 = 1,
    Glock = 2,
    P250 = 3,
    Deagle = 4,
    FiveSeven = 5,
    DualBerettas = 6,
    Tec9 = 7,
    CZ = 8,
    USP = 9,
    Revolver = 10,

    // SMGs
    MP7 = 101,
    MP9 = 102,
    Bizon = 103,
    Mac10 = 104,
    UMP = 105,
    P90 = 106,
    MP5 = 107,

    // Heavy
    SawedOff = 201,
    Nova = 202,
    Swag7 = 203,
    XM1014 = 204,
    M249 = 205,
    Negev = 206,

    // Rifles
    Galil = 301,
    Famas = 302,
    AK47 = 303,
    M4A4 = 304,
    M4A1 = 305,
    Scout = 306,
    SG556 = 307,
    AUG = 308,
    AWP = 309,
    Scar20 = 310,
    G3SG1 = 311,

    // Equipment
    Zeus = 401,
    Kevlar = 402,
    Helmet = 403,
    Bomb = 404,
    Knife = 405,
    DefuseKit = 406,
    World = 407,

    // Grenades
    Decoy = 501,
    Molotov = 502,
    Incendiary = 503,
    Flash = 504,
    Smoke = 505,
    HE = 506,
}

lazy_static! {
    static ref EQUIPMENT_NAME_TO_WEAPON: HashMap<&'static str, EquipmentElement> = {
        use EquipmentElement::*;
        HashMap::from([
            ("ak47",                    AK47),
            ("aug",                     AUG),
            ("awp",                     AWP),
            ("bizon",                   Bizon),
            ("c4",                      Bomb),
            ("deagle",                  Deagle),
            ("decoy",                   Decoy),
            ("decoygrenade",            Decoy),
            ("decoyprojectile",         Decoy),
            ("elite",                   DualBerettas),
            ("famas",                   Famas),
            ("fiveseven",               FiveSeven),
            ("flashbang",               Flash),
            ("g3sg1",                   G3SG1),
            ("galil",                   Galil),
            ("galilar",                 Galil),
            ("glock",                   Glock),
            ("hegrenade",               HE),
            ("hkp2000",                 P2000),
            ("incgrenade",              Incendiary),
            ("incendiarygrenade",       Incendiary),
            ("m249",                    M249),
            ("m4a1",                    M4A4),
            ("mac10",                   Mac10),
            ("mag7",                    Swag7),
            ("molotov",                 Molotov),
            ("molotovgrenade",          Molotov),
            ("molotovprojectile",       Molotov),
            ("mp7",                     MP7),
            ("mp5sd",                   MP5),
            ("mp9",                     MP9),
            ("negev",                   Negev),
            ("nova",                    Nova),
            ("p250",                    P250),
            ("p90",                     P90),
            ("sawedoff",                SawedOff),
            ("scar20",                  Scar20),
            ("sg556",                   SG556),
            ("smokegrenade",            Smoke),
            ("smokegrenadeprojectile",  Smoke),
            ("ssg08",                   Scout),
            ("taser",                   Zeus),
            ("tec9",                    Tec9),
            ("ump45",                   UMP),
            ("xm1014",                  XM1014),
            ("m4a1_silencer",           M4A1),
            ("m4a1_silencer_off",       M4A1),
            ("cz75a",                   CZ),
            ("usp",                     USP),
            ("usp_silencer",            USP),
            ("usp_silencer_off",        USP),
            ("world",                   World),
            ("inferno",                 Incendiary),
            ("revolver",                Revolver),
            ("vest",                    Kevlar),
            ("vesthelm",                Helmet),
            ("defuser",                 DefuseKit),

            // Never shipped or removed from the game
            ("scar17",                  Unknown),
            ("sensorgrenade",           Unknown),
            ("mp5navy",                 Unknown),
            ("p228",                    Unknown),
            ("scout",                   Unknown),
            ("sg550",                   Unknown),
            ("sg552",                   Unknown),
            ("tmp",                     Unknown),
            ("worldspawn",              World),
        ])
    };
    static ref EQUIPMENT_ELEMENT_TO_NAME: HashMap<EquipmentElement, &'static str> = {
        use EquipmentElement::*;
        HashMap::from([
            (AK47,         "AK-47"),
            (AUG,          "AUG"),
            (AWP,          "AWP"),
            (Bizon,        "PP-Bizon"),
            (Bomb,         "C4"),
            (Deagle,       "Desert Eagle"),
            (Decoy,        "Decoy Grenade"),
            (DualBerettas, "Dual Berettas"),
            (Famas,        "FAMAS"),
            (FiveSeven,    "Five-SeveN"),
            (Flash,        "Flashbang"),
            (G3SG1,        "G3SG1"),
            (Galil,        "Galil AR"),
            (Glock,        "Glock-18"),
            (HE,           "HE Grenade"),
            (P2000,        "P2000"),
            (Incendiary,   "Incendiary Grenade"),
            (M249,         "M249"),
            (M4A4,         "M4A4"),
            (Mac10,        "MAC-10"),
            (Swag7,        "MAG-7"),
            (Molotov,      "Molotov"),
            (MP7,          "MP7"),
            (MP5,          "MP5-SD"),
            (MP9,          "MP9"),
            (Negev,        "Negev"),
            (Nova,         "Nova"),
            (P250,         "P250"),
            (P90,          "P90"),
            (SawedOff,     "Sawed-Off"),
            (Scar20,       "SCAR-20"),
            (SG556,        "SG 553"),
            (Smoke,        "Smoke Grenade"),
            (Scout,        "SSG 08"),
            (Zeus,         "Zeus x27"),
            (Tec9,         "Tec-9"),
            (UMP,          "UMP-45"),
            (XM1014,       "XM1014"),
            (M4A1,         "M4A1"),
            (CZ,           "CZ75 Auto"),
            (USP,          "USP-S"),
            (World,        "World"),
            (Revolver,     "R8 Revolver"),
            (Kevlar,       "Kevlar Vest"),
            (Helmet,       "Kevlar + Helmet"),
            (DefuseKit,    "Defuse Kit"),
            (Knife,        "Knife"),
            (Unknown,      "UNKNOWN"),
        ])
    };
}

impl EquipmentElement {
    pub fn display_name(self) -> &'static str {
        EQUIPMENT_ELEMENT_TO_NAME
            .get(&self)
            .copied()
            .unwrap_or("UNKNOWN")
    }
}

pub fn map_equipment_name(eq_name: &str) -> EquipmentElement {
    let eq_name = eq_name.trim_start_matches("weapon_");
    if eq_name.contains("knife") || eq_name.contains("bayonet") {
        return EquipmentElement::Knife;
    }

    match EQUIPMENT_NAME_TO_WEAPON.get(eq_name) {
        Some(eq) => *eq,
        None => {
            debug!("unknown equipment name {eq_name:?}");
            EquipmentElement::Unknown
        }
    }
}

fn lowercase_from(name: &str, start: usize) -> Option<String> {
    name.get(start..).map(str::to_lowercase)
}

/// Derives the weapon identity of every class descending from
/// `CWeaponCSBase`, keyed by class index.
pub fn map_equipment(classes: &ServerClasses) -> HashMap<usize, EquipmentElement> {
    let mut mapping = HashMap::new();
    for (idx, sc) in classes.iter().enumerate() {
        if let Some(eq) = map_class(classes, sc) {
            trace!("{} -> {eq:?}", sc.name);
            mapping.insert(idx, eq);
        }
    }
    debug!("mapped {} weapon classes", mapping.len());
    mapping
}

fn base_class_name<'a>(classes: &'a ServerClasses, sc: &ServerClass, depth: usize) -> Option<&'a str> {
    sc.base_classes
        .get(depth)
        .and_then(|idx| classes.get(*idx).ok())
        .map(|bc| bc.name.as_str())
}

fn map_class(classes: &ServerClasses, sc: &ServerClass) -> Option<EquipmentElement> {
    let weapon_base = base_class_name(classes, sc, WEAPON_BASE_DEPTH)?;
    if weapon_base != WEAPON_BASE {
        return None;
    }

    if let Some(kind) = base_class_name(classes, sc, WEAPON_KIND_DEPTH) {
        return match kind {
            GUN_BASE => lowercase_from(&sc.dt_name, 9).map(|n| map_equipment_name(&n)),
            GRENADE_BASE => lowercase_from(&sc.dt_name, 3).map(|n| map_equipment_name(&n)),
            _ => None,
        };
    }

    if sc.name == KNIFE_CLASS || weapon_base == KNIFE_CLASS {
        return Some(EquipmentElement::Knife);
    }

    match sc.name.as_str() {
        "CC4" => Some(EquipmentElement::Bomb),
        "CWeaponNOVA" | "CWeaponSawedoff" | "CWeaponXM1014" => {
            lowercase_from(&sc.name, 7).map(|n| map_equipment_name(&n))
        }
        _ => None,
    }
}

/// One slot of the weapon arena, indexed by entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub entity_id: i32,
    pub weapon: EquipmentElement,
    /// Index into the player table.
    pub owner: Option<usize>,
    pub ammo_in_magazine: i32,
    pub ammo_type: i32,
    pub original_string: String,
}

impl Default for Equipment {
    fn default() -> Self {
        Self {
            entity_id: -1,
            weapon: EquipmentElement::Unknown,
            owner: None,
            ammo_in_magazine: -1,
            ammo_type: 0,
            original_string: String::new(),
        }
    }
}

pub(crate) fn bind_weapons(classes: &ServerClasses, subs: &mut Subscriptions) {
    for (idx, sc) in classes.iter().enumerate() {
        let is_weapon = sc
            .base_classes
            .iter()
            .any(|bc| classes.get(*bc).map_or(false, |bc| bc.name == WEAPON_BASE));
        if is_weapon {
            subs.on_created(idx, bind_weapon);
        }
    }
}

fn bind_weapon(ctx: &mut BindingContext<'_>) -> Result<()> {
    let weapon = ctx
        .state
        .equipment_mapping
        .get(&ctx.class_index)
        .copied()
        .unwrap_or_default();

    let eq = ctx.state.weapon_mut(ctx.entity_id as i64)?;
    eq.entity_id = ctx.entity_id;
    eq.weapon = weapon;
    eq.ammo_in_magazine = -1;

    ctx.on_update("m_iClip1", |ctx, u| {
        ctx.state.weapon_mut(u.entity_id as i64)?.ammo_in_magazine = u.int()? - 1;
        Ok(())
    });
    ctx.on_update("LocalWeaponData.m_iPrimaryAmmoType", |ctx, u| {
        ctx.state.weapon_mut(u.entity_id as i64)?.ammo_type = u.int()?;
        Ok(())
    });

    let fix = match weapon {
        EquipmentElement::P2000 => Some(("_pist_hkp2000", "_pist_223", EquipmentElement::USP)),
        EquipmentElement::M4A4 => Some(("_rif_m4a1", "_rif_m4a1_s", EquipmentElement::M4A1)),
        EquipmentElement::P250 => Some(("_pist_p250", "_pist_cz_75", EquipmentElement::CZ)),
        _ => None,
    };
    if let Some((ok, variant, changed)) = fix {
        ctx.on_update("m_nModelIndex", move |ctx, u| {
            fix_weapon_model(ctx, u, ok, variant, changed)
        });
    }
    Ok(())
}

/// Some weapons share a class with their variant and are told apart by model.
fn fix_weapon_model(
    ctx: &mut BindingContext<'_>,
    u: &PropertyUpdate<'_>,
    ok: &str,
    variant: &str,
    changed: EquipmentElement,
) -> Result<()> {
    let precache = &ctx.state.model_precache;
    let model_idx = check_capacity("model precache", u.int()? as i64, precache.len())?;
    let model = precache[model_idx].clone();

    let eq = ctx.state.weapon_mut(u.entity_id as i64)?;
    // The variant name contains the regular one for the M4.
    if model.contains(variant) {
        eq.weapon = changed;
    } else if !model.contains(ok) {
        return Err(ParserError::UnknownWeaponModel(model));
    }
    eq.original_string = model;
    Ok(())
}

pub(crate) fn new_weapon_arena() -> Vec<Equipment> {
    vec![Equipment::default(); MAX_ENTITIES]
}

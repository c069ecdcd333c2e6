//! Shared test utilities: a reference in-memory store and the fact base
//! the end-to-end tests query against.
//!
//! `World` implements the `Store` oracle the engine consumes. Entities
//! are interned by name; every entity carries an implicit `Ident`
//! component so it always has a backing table. After seeding facts,
//! `build` groups entities into tables by their exact component set and
//! registers every table under its ids and their wildcard-normalized
//! forms, which is what `table_set_for` serves lookups from.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;

use quarry::{Id, Role, StorageRecord, Store, TableId, TableRecord, TableSet, ISA};

const FIRST_USER_ID: u64 = 16;

struct TableData {
    ty: Vec<Id>,
    entities: Vec<Id>,
}

#[derive(Default)]
pub struct World {
    names: Vec<String>,
    by_name: HashMap<String, Id>,
    components: HashMap<u64, Vec<Id>>,
    creation_order: Vec<Id>,
    transitive: Vec<Id>,
    finals: Vec<Id>,
    ident: Id,

    tables: Vec<TableData>,
    records: HashMap<u64, StorageRecord>,
    index: HashMap<u64, TableSet>,
}

impl World {
    pub fn new() -> World {
        let mut world = World::default();
        world.ident = world.entity("Ident");
        world
    }

    /// Intern an entity by name. `IsA` always resolves to the engine's
    /// reserved subtype relation.
    pub fn entity(&mut self, name: &str) -> Id {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = if name == "IsA" {
            ISA
        } else {
            Id(FIRST_USER_ID + self.names.len() as u64)
        };
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        self.creation_order.push(id);
        let marker = if self.ident.is_zero() { id } else { self.ident };
        self.components.insert(id.0, vec![marker]);
        id
    }

    pub fn id(&self, name: &str) -> Id {
        self.by_name[name]
    }

    pub fn name_of(&self, id: Id) -> &str {
        let pos = self
            .creation_order
            .iter()
            .position(|&e| e == id)
            .expect("named entity");
        &self.names[pos]
    }

    pub fn add(&mut self, entity: Id, component: Id) {
        let list = self.components.entry(entity.0).or_default();
        if !list.contains(&component) {
            list.push(component);
        }
    }

    /// `pred(subject)` with both interned by name.
    pub fn fact(&mut self, pred: &str, subject: &str) {
        let p = self.entity(pred);
        let s = self.entity(subject);
        self.add(s, p);
    }

    /// `pred(subject, object)` with all three interned by name.
    pub fn fact_pair(&mut self, pred: &str, subject: &str, object: &str) {
        let p = self.entity(pred);
        let s = self.entity(subject);
        let o = self.entity(object);
        self.add(s, Id::pair(p, o));
    }

    pub fn set_transitive(&mut self, name: &str) {
        let id = self.entity(name);
        self.transitive.push(id);
    }

    pub fn set_final(&mut self, name: &str) {
        let id = self.entity(name);
        self.finals.push(id);
    }

    /// Group entities into tables and build the table index. Must run
    /// after seeding and before iterating.
    pub fn build(&mut self) {
        self.tables.clear();
        self.records.clear();
        self.index.clear();

        let mut by_type: HashMap<Vec<u64>, usize> = HashMap::new();
        for &entity in &self.creation_order {
            let mut ty: Vec<Id> = self.components.get(&entity.0).cloned().unwrap_or_default();
            ty.sort();
            let key: Vec<u64> = ty.iter().map(|id| id.0).collect();
            let table = match by_type.get(&key) {
                Some(&t) => t,
                None => {
                    self.tables.push(TableData { ty, entities: Vec::new() });
                    by_type.insert(key, self.tables.len() - 1);
                    self.tables.len() - 1
                }
            };
            let row = self.tables[table].entities.len();
            self.tables[table].entities.push(entity);
            self.records
                .insert(entity.0, StorageRecord { table: TableId(table as u32), row });
        }

        for (t, data) in self.tables.iter().enumerate() {
            for (column, &id) in data.ty.iter().enumerate() {
                let keys: Vec<Id> = if id.is_pair() {
                    vec![
                        id,
                        Id::pair(id.hi(), quarry::WILDCARD),
                        Id::pair(quarry::WILDCARD, id.lo()),
                        Id::pair(quarry::WILDCARD, quarry::WILDCARD),
                    ]
                } else {
                    vec![id, quarry::WILDCARD]
                };
                for key in keys {
                    self.index
                        .entry(key.0)
                        .or_insert_with(TableSet::new)
                        .insert(TableRecord { table: TableId(t as u32), column });
                }
            }
        }
    }
}

impl Store for World {
    fn record_of(&self, entity: Id) -> Option<StorageRecord> {
        self.records.get(&entity.0).copied()
    }

    fn table_set_for(&self, mask: Id) -> Option<&TableSet> {
        self.index.get(&mask.0)
    }

    fn table_type(&self, table: TableId) -> &[Id] {
        &self.tables[table.0 as usize].ty
    }

    fn table_entities(&self, table: TableId) -> &[Id] {
        &self.tables[table.0 as usize].entities
    }

    fn table_row_count(&self, table: TableId) -> usize {
        self.tables[table.0 as usize].entities.len()
    }

    fn has_role(&self, id: Id, role: Role) -> bool {
        match role {
            Role::Transitive => self.transitive.contains(&id),
            Role::Final => self.finals.contains(&id),
            Role::IsA => id == ISA,
        }
    }
}

/// The fact base most end-to-end tests run against.
pub fn star_wars() -> World {
    let mut w = World::new();
    w.set_transitive("IsA");
    w.set_final("IsA");

    for (sub, sup) in [
        ("CelestialBody", "Thing"),
        ("Planet", "CelestialBody"),
        ("Moon", "CelestialBody"),
        ("Person", "Thing"),
        ("Machine", "Thing"),
        ("SentientMachine", "Machine"),
        ("Character", "Person"),
        ("Human", "Character"),
        ("Droid", "Character"),
        ("Droid", "SentientMachine"),
        ("Creature", "Character"),
        ("Wookie", "Creature"),
        ("Vehicle", "Machine"),
        ("Transport", "Vehicle"),
        ("Transport", "Container"),
        ("SpaceShip", "Transport"),
        ("Speeder", "Transport"),
        ("CorellianLightFreighter", "SpaceShip"),
        ("MilleniumFalcon", "CorellianLightFreighter"),
        ("XWing", "SpaceShip"),
        ("YWing", "SpaceShip"),
        ("Cyborg", "SentientMachine"),
        ("Cyborg", "Human"),
        ("Rebellion", "Faction"),
        ("FirstOrder", "Faction"),
    ] {
        w.fact_pair("IsA", sub, sup);
    }

    w.fact("Sentient", "Droid");
    w.fact("Sentient", "Human");
    w.fact_pair("Faction", "XWing", "Rebellion");
    w.fact_pair("AtWar", "FirstOrder", "Rebellion");
    w.fact_pair("AtWar", "Rebellion", "FirstOrder");

    for human in ["Luke", "Leia", "Rey", "HanSolo", "BenSolo"] {
        w.fact("Human", human);
    }
    w.fact("Cyborg", "Grievous");
    w.fact("Creature", "Yoda");
    for jedi in ["Yoda", "Luke", "Leia", "Rey"] {
        w.fact("Jedi", jedi);
    }
    w.fact("Sith", "DarthVader");
    w.fact("Sith", "Palpatine");
    for droid in ["R2D2", "C3PO", "BB8"] {
        w.fact("Droid", droid);
    }
    w.fact("Wookie", "Chewbacca");

    w.fact_pair("HomePlanet", "Yoda", "Dagobah");
    w.fact_pair("HomePlanet", "Luke", "Tatooine");
    w.fact_pair("HomePlanet", "Rey", "Tatooine");
    w.fact_pair("HomePlanet", "BB8", "Tatooine");
    w.fact_pair("HomePlanet", "DarthVader", "Mustafar");

    w.fact_pair("Parent", "Luke", "DarthVader");
    w.fact_pair("Parent", "Leia", "DarthVader");
    w.fact_pair("Parent", "BenSolo", "HanSolo");
    w.fact_pair("Parent", "BenSolo", "Leia");

    w.fact_pair("Enemy", "Luke", "Palpatine");
    w.fact_pair("Enemy", "Luke", "DarthVader");
    w.fact_pair("Enemy", "Yoda", "Palpatine");
    w.fact_pair("Enemy", "Yoda", "DarthVader");
    w.fact_pair("Enemy", "Rey", "Palpatine");

    w.fact_pair("Likes", "Leia", "HanSolo");
    w.fact_pair("Likes", "HanSolo", "Leia");
    w.fact_pair("Likes", "Fin", "Rey");
    w.fact_pair("Likes", "Rey", "Ben");

    w.build();
    w
}

/// Drain an iterator, returning the names of all yielded entities in
/// yield order.
pub fn collect_names(world: &World, it: &mut quarry::RuleIter<'_>) -> Vec<String> {
    let mut names = Vec::new();
    while it.next() {
        for &e in it.entities() {
            names.push(world.name_of(e).to_string());
        }
    }
    names
}

/// Drain an iterator, returning per yield the names of the entities plus
/// the value of one variable.
pub fn collect_with_var(
    world: &World,
    it: &mut quarry::RuleIter<'_>,
    var: usize,
) -> Vec<(Vec<String>, String)> {
    let mut out = Vec::new();
    while it.next() {
        let names = it
            .entities()
            .iter()
            .map(|&e| world.name_of(e).to_string())
            .collect();
        out.push((names, world.name_of(it.variable(var)).to_string()));
    }
    out
}

pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names.dedup();
    names
}

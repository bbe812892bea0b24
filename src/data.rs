//! Interaction data: the training set of positive `(user, item)` rows and
//! its compressed per-user form used for strict negative masking.
use std::cmp::Ordering;

use super::{ItemId, UserId};

/// A single positive interaction between a user and an item.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    #[serde(default = "default_weight")]
    weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

impl Interaction {
    /// Create a new interaction with unit weight.
    pub fn new(user_id: UserId, item_id: ItemId) -> Self {
        Interaction {
            user_id,
            item_id,
            weight: default_weight(),
        }
    }

    /// Set the weight of the interaction.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// The user id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The item id.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The weight of the interaction.
    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// The training set: an ordered collection of positive interactions.
#[derive(Clone, Debug)]
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Create an empty set of interactions with the given shape.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Interactions {
            num_users,
            num_items,
            interactions: Vec::new(),
        }
    }

    /// Add an interaction, growing the shape if the ids fall outside it.
    pub fn push(&mut self, interaction: Interaction) {
        self.num_users = self.num_users.max(interaction.user_id() + 1);
        self.num_items = self.num_items.max(interaction.item_id() + 1);
        self.interactions.push(interaction);
    }

    /// The underlying rows.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Build the compressed user-by-item matrix.
    pub fn to_compressed(&self) -> InteractionMatrix {
        InteractionMatrix::from(self)
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_id() + 1).max().unwrap_or(0);
        let num_items = data.iter().map(|x| x.item_id() + 1).max().unwrap_or(0);

        Interactions {
            num_users,
            num_items,
            interactions: data,
        }
    }
}

fn cmp_user_item(x: &Interaction, y: &Interaction) -> Ordering {
    x.user_id()
        .cmp(&y.user_id())
        .then_with(|| x.item_id().cmp(&y.item_id()))
}

/// Sparse boolean user-by-item matrix in compressed row form.
///
/// Row `u` holds the sorted, deduplicated ids of the items user `u`
/// has interacted with.
#[derive(Clone, Debug)]
pub struct InteractionMatrix {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
}

impl<'a> From<&'a Interactions> for InteractionMatrix {
    fn from(interactions: &Interactions) -> InteractionMatrix {
        let mut data = interactions.data().to_owned();

        data.sort_by(cmp_user_item);
        data.dedup_by(|x, y| x.user_id() == y.user_id() && x.item_id() == y.item_id());

        let mut user_pointers = vec![0; interactions.num_users + 1];
        let mut item_ids = Vec::with_capacity(data.len());

        for datum in &data {
            item_ids.push(datum.item_id());
            user_pointers[datum.user_id() + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        InteractionMatrix {
            num_users: interactions.num_users,
            num_items: interactions.num_items,
            user_pointers,
            item_ids,
        }
    }
}

impl InteractionMatrix {
    /// Iterate over all users, including those with no interactions.
    pub fn iter_users(&self) -> InteractionMatrixUserIterator<'_> {
        InteractionMatrixUserIterator {
            matrix: self,
            idx: 0,
        }
    }

    /// The items `user_id` has interacted with, or `None` if the user
    /// is out of range.
    pub fn get_user(&self, user_id: UserId) -> Option<InteractionMatrixUser<'_>> {
        if user_id >= self.num_users {
            return None;
        }

        Some(self.user_row(user_id))
    }

    /// Whether `user_id` has interacted with `item_id`.
    pub fn contains(&self, user_id: UserId, item_id: ItemId) -> bool {
        self.get_user(user_id)
            .map(|user| user.item_ids.binary_search(&item_id).is_ok())
            .unwrap_or(false)
    }

    /// Number of stored (user, item) pairs.
    pub fn nnz(&self) -> usize {
        self.item_ids.len()
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }

    fn user_row(&self, user_id: UserId) -> InteractionMatrixUser<'_> {
        let start = self.user_pointers[user_id];
        let stop = self.user_pointers[user_id + 1];

        InteractionMatrixUser {
            user_id,
            item_ids: &self.item_ids[start..stop],
        }
    }
}

/// Iterator over the rows of an [`InteractionMatrix`].
pub struct InteractionMatrixUserIterator<'a> {
    matrix: &'a InteractionMatrix,
    idx: usize,
}

/// A single row of an [`InteractionMatrix`].
#[derive(Debug)]
pub struct InteractionMatrixUser<'a> {
    /// The user id.
    pub user_id: UserId,
    /// Sorted ids of the items the user interacted with.
    pub item_ids: &'a [ItemId],
}

impl<'a> InteractionMatrixUser<'a> {
    /// Number of items in the row.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether the user has no interactions.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

impl<'a> Iterator for InteractionMatrixUserIterator<'a> {
    type Item = InteractionMatrixUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.matrix.num_users {
            return None;
        }

        let value = self.matrix.user_row(self.idx);
        self.idx += 1;

        Some(value)
    }
}

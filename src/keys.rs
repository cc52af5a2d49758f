//! Query keys for the drink journal's remote resources.

use crate::cache::{KeySegment, QueryKey};

// ============================================================================
// Query key types
// ============================================================================

/// Every cached resource the journal client reads.
///
/// Each variant maps to a fixed segment list, with the resource family first
/// so a whole family can be invalidated by prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrinkQueryKey {
  /// Everything about drinks
  Drinks,
  /// A user's logged drinks
  DrinkList { user_id: String },
  DrinkDetail { id: String },
  /// A drink as shown on a public profile
  PublicDrink { id: String },

  Collections,
  CollectionList { user_id: String },
  CollectionDetail { id: String },
  CollectionDrinks { collection_id: String },
  /// A shared collection opened from a link
  PublicCollection { share_id: String },
  CollectionsForDrink { drink_id: String },
  PublicCollectionsByUser { user_id: String },

  CustomDrinkTypes,
  CustomDrinkTypeList { user_id: String },

  Follows,
  FollowStatus { follower_id: String, following_id: String },
  FollowCounts { user_id: String },
  Followers { user_id: String },
  Following { user_id: String },

  Feed,
  FeedList,
  UserActivities { user_id: String },

  Profile,
  ProfileDetail { user_id: String },
  ProfileByUsername { username: String },
  ProfileByUserId { user_id: String },
  ProfileSearch { query: String },
  UsernameAvailable { username: String },

  ProfileStats,
  ProfileStatsDetail { user_id: String },
}

impl DrinkQueryKey {
  /// Segment list for this resource.
  pub fn segments(&self) -> Vec<KeySegment> {
    use DrinkQueryKey::*;

    let parts: Vec<&str> = match self {
      Drinks => vec!["drinks"],
      DrinkList { user_id } => vec!["drinks", "list", user_id.as_str()],
      DrinkDetail { id } => vec!["drinks", "detail", id.as_str()],
      PublicDrink { id } => vec!["drinks", "public", id.as_str()],

      Collections => vec!["collections"],
      CollectionList { user_id } => vec!["collections", "list", user_id.as_str()],
      CollectionDetail { id } => vec!["collections", "detail", id.as_str()],
      CollectionDrinks { collection_id } => vec!["collections", "drinks", collection_id.as_str()],
      PublicCollection { share_id } => vec!["collections", "public", share_id.as_str()],
      CollectionsForDrink { drink_id } => vec!["collections", "forDrink", drink_id.as_str()],
      PublicCollectionsByUser { user_id } => vec!["collections", "publicByUser", user_id.as_str()],

      CustomDrinkTypes => vec!["customDrinkTypes"],
      CustomDrinkTypeList { user_id } => vec!["customDrinkTypes", "list", user_id.as_str()],

      Follows => vec!["follows"],
      FollowStatus {
        follower_id,
        following_id,
      } => vec!["follows", "status", follower_id.as_str(), following_id.as_str()],
      FollowCounts { user_id } => vec!["follows", "counts", user_id.as_str()],
      Followers { user_id } => vec!["follows", "followers", user_id.as_str()],
      Following { user_id } => vec!["follows", "following", user_id.as_str()],

      Feed => vec!["feed"],
      FeedList => vec!["feed", "list"],
      UserActivities { user_id } => vec!["feed", "userActivities", user_id.as_str()],

      Profile => vec!["profile"],
      ProfileDetail { user_id } => vec!["profile", "detail", user_id.as_str()],
      ProfileByUsername { username } => vec!["profile", "byUsername", username.as_str()],
      ProfileByUserId { user_id } => vec!["profile", "byUserId", user_id.as_str()],
      ProfileSearch { query } => vec!["profile", "search", query.as_str()],
      UsernameAvailable { username } => vec!["profile", "usernameAvailable", username.as_str()],

      ProfileStats => vec!["profileStats"],
      ProfileStatsDetail { user_id } => vec!["profileStats", "detail", user_id.as_str()],
    };

    parts.into_iter().map(KeySegment::from).collect()
  }

  /// Recognize a stored key. Keys outside the journal's families give `None`.
  pub fn from_key(key: &QueryKey) -> Option<Self> {
    use DrinkQueryKey::*;

    let parts = key
      .segments()
      .iter()
      .map(|segment| match segment {
        KeySegment::Str(s) => Some(s.as_str()),
        _ => None,
      })
      .collect::<Option<Vec<&str>>>()?;

    let key = match parts.as_slice() {
      ["drinks"] => Drinks,
      ["drinks", "list", user_id] => DrinkList { user_id: user_id.to_string() },
      ["drinks", "detail", id] => DrinkDetail { id: id.to_string() },
      ["drinks", "public", id] => PublicDrink { id: id.to_string() },

      ["collections"] => Collections,
      ["collections", "list", user_id] => CollectionList { user_id: user_id.to_string() },
      ["collections", "detail", id] => CollectionDetail { id: id.to_string() },
      ["collections", "drinks", collection_id] => CollectionDrinks {
        collection_id: collection_id.to_string(),
      },
      ["collections", "public", share_id] => PublicCollection {
        share_id: share_id.to_string(),
      },
      ["collections", "forDrink", drink_id] => CollectionsForDrink {
        drink_id: drink_id.to_string(),
      },
      ["collections", "publicByUser", user_id] => PublicCollectionsByUser {
        user_id: user_id.to_string(),
      },

      ["customDrinkTypes"] => CustomDrinkTypes,
      ["customDrinkTypes", "list", user_id] => CustomDrinkTypeList {
        user_id: user_id.to_string(),
      },

      ["follows"] => Follows,
      ["follows", "status", follower_id, following_id] => FollowStatus {
        follower_id: follower_id.to_string(),
        following_id: following_id.to_string(),
      },
      ["follows", "counts", user_id] => FollowCounts { user_id: user_id.to_string() },
      ["follows", "followers", user_id] => Followers { user_id: user_id.to_string() },
      ["follows", "following", user_id] => Following { user_id: user_id.to_string() },

      ["feed"] => Feed,
      ["feed", "list"] => FeedList,
      ["feed", "userActivities", user_id] => UserActivities { user_id: user_id.to_string() },

      ["profile"] => Profile,
      ["profile", "detail", user_id] => ProfileDetail { user_id: user_id.to_string() },
      ["profile", "byUsername", username] => ProfileByUsername {
        username: username.to_string(),
      },
      ["profile", "byUserId", user_id] => ProfileByUserId { user_id: user_id.to_string() },
      ["profile", "search", query] => ProfileSearch { query: query.to_string() },
      ["profile", "usernameAvailable", username] => UsernameAvailable {
        username: username.to_string(),
      },

      ["profileStats"] => ProfileStats,
      ["profileStats", "detail", user_id] => ProfileStatsDetail { user_id: user_id.to_string() },

      _ => return None,
    };

    Some(key)
  }

  /// Human-readable description, shown by `barkeep inspect`.
  pub fn description(&self) -> String {
    use DrinkQueryKey::*;

    match self {
      Drinks => "all drinks".to_string(),
      DrinkList { user_id } => format!("drinks of {}", user_id),
      DrinkDetail { id } => format!("drink {}", id),
      PublicDrink { id } => format!("public drink {}", id),
      Collections => "all collections".to_string(),
      CollectionList { user_id } => format!("collections of {}", user_id),
      CollectionDetail { id } => format!("collection {}", id),
      CollectionDrinks { collection_id } => format!("drinks in collection {}", collection_id),
      PublicCollection { share_id } => format!("shared collection {}", share_id),
      CollectionsForDrink { drink_id } => format!("collections containing {}", drink_id),
      PublicCollectionsByUser { user_id } => format!("public collections of {}", user_id),
      CustomDrinkTypes => "all custom drink types".to_string(),
      CustomDrinkTypeList { user_id } => format!("custom drink types of {}", user_id),
      Follows => "all follows".to_string(),
      FollowStatus {
        follower_id,
        following_id,
      } => format!("whether {} follows {}", follower_id, following_id),
      FollowCounts { user_id } => format!("follow counts of {}", user_id),
      Followers { user_id } => format!("followers of {}", user_id),
      Following { user_id } => format!("users {} follows", user_id),
      Feed => "all feeds".to_string(),
      FeedList => "activity feed".to_string(),
      UserActivities { user_id } => format!("activity of {}", user_id),
      Profile => "all profiles".to_string(),
      ProfileDetail { user_id } => format!("profile {}", user_id),
      ProfileByUsername { username } => format!("profile @{}", username),
      ProfileByUserId { user_id } => format!("profile of user {}", user_id),
      ProfileSearch { query } => format!("profiles matching {:?}", query),
      UsernameAvailable { username } => format!("availability of @{}", username),
      ProfileStats => "all profile stats".to_string(),
      ProfileStatsDetail { user_id } => format!("stats of {}", user_id),
    }
  }
}

impl From<DrinkQueryKey> for QueryKey {
  fn from(key: DrinkQueryKey) -> Self {
    QueryKey::new(key.segments())
  }
}

impl From<&DrinkQueryKey> for QueryKey {
  fn from(key: &DrinkQueryKey) -> Self {
    QueryKey::new(key.segments())
  }
}

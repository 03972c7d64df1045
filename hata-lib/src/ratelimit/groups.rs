//! Rate limit groups of common Discord endpoint families.
//!
//! Each group is created on first use and lives for the rest of the process.
//! Endpoints sharing a Discord bucket must share a group.

use std::sync::LazyLock;

use crate::ratelimit::{Limiter, RatelimitGroup};

macro_rules! groups {
    ($($(#[$meta:meta])* $name:ident => $limiter:ident;)*) => {
        $(
            $(#[$meta])*
            pub static $name: LazyLock<RatelimitGroup> =
                LazyLock::new(|| RatelimitGroup::new(Limiter::$limiter));
        )*

        /// Look up a group by the name of its static, case-insensitively
        ///
        /// ```
        /// use hata_lib::ratelimit::{Limiter, groups};
        ///
        /// let group = groups::by_name("message_create").unwrap();
        /// assert_eq!(group.limiter(), Limiter::Channel);
        /// assert!(groups::by_name("does_not_exist").is_none());
        /// ```
        #[must_use]
        pub fn by_name(name: &str) -> Option<&'static RatelimitGroup> {
            $(
                if name.eq_ignore_ascii_case(stringify!($name)) {
                    return Some(&*$name);
                }
            )*
            None
        }

        /// Names accepted by [`by_name`]
        pub const NAMES: &[&str] = &[$(stringify!($name)),*];
    };
}

groups! {
    /// `GET /gateway/bot`
    GATEWAY_BOT_GET => Global;
    /// `GET /users/{user.id}`
    USER_GET => Global;
    /// `GET /channels/{channel.id}`
    CHANNEL_GET => Channel;
    /// `POST /channels/{channel.id}/messages`
    MESSAGE_CREATE => Channel;
    /// `GET /channels/{channel.id}/messages/{message.id}`
    MESSAGE_GET => Channel;
    /// `DELETE /channels/{channel.id}/messages/{message.id}`
    MESSAGE_DELETE => Channel;
    /// `PUT /channels/{channel.id}/messages/{message.id}/reactions/{emoji}/@me`
    REACTION_ADD => Channel;
    /// `GET /guilds/{guild.id}`
    GUILD_GET => Guild;
    /// `GET /guilds/{guild.id}/members/{user.id}`
    GUILD_MEMBER_GET => Guild;
    /// `POST /guilds/{guild.id}/roles`
    GUILD_ROLE_CREATE => Guild;
    /// `POST /webhooks/{webhook.id}/{webhook.token}`
    WEBHOOK_EXECUTE => Webhook;
    /// `POST /interactions/{interaction.id}/{interaction.token}/callback`
    INTERACTION_RESPONSE_CREATE => Unlimited;
}

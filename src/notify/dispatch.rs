// src/notify/dispatch.rs

//! Notification fan-out
//!
//! Walks a committed [`NotifyQueue`] once, in ascending Object ID order:
//!
//! 1. access control sync
//! 2. Security changes: socket update per touched instance, server reload
//! 3. Server changes: server reload or registration updates
//! 4. one consolidated server reload in immediate-update mode
//! 5. observation re-evaluation
//! 6. attribute storage sync
//!
//! Every step runs even if an earlier one failed; the first error is
//! returned.

use crate::config::ClientConfig;
use crate::dm::{DataModel, oid, server, valid_ssid};
use crate::error::{Error, Result, keep_first};
use crate::notify::queue::{NotifyQueue, ObjectChanges};
use crate::notify::DataModelHooks;
use crate::observe::ObservationSink;
use crate::path::{Iid, Rid, UriPath};
use crate::servers::{SSID_BOOTSTRAP, ServerManager, Ssid};
use tracing::{debug, warn};

/// Collaborators a flush talks to
pub struct NotifyContext<'a> {
    pub dm: &'a mut DataModel,
    pub servers: &'a mut dyn ServerManager,
    pub observer: &'a mut dyn ObservationSink,
    pub hooks: &'a mut dyn DataModelHooks,
    pub config: &'a ClientConfig,
}

/// Process `queue` on behalf of `origin`, including server side effects
pub fn perform(ctx: &mut NotifyContext<'_>, origin: Ssid, queue: &NotifyQueue) -> Result<()> {
    perform_impl(ctx, origin, queue, true)
}

/// Process `queue` without Server-object side effects
///
/// Bootstrap Finish uses this: it reloads servers on its own afterwards.
pub fn perform_without_servers(
    ctx: &mut NotifyContext<'_>,
    origin: Ssid,
    queue: &NotifyQueue,
) -> Result<()> {
    perform_impl(ctx, origin, queue, false)
}

/// [`perform`] and clear the queue
pub fn flush(ctx: &mut NotifyContext<'_>, origin: Ssid, queue: &mut NotifyQueue) -> Result<()> {
    let result = perform(ctx, origin, queue);
    queue.clear();
    result
}

fn perform_impl(
    ctx: &mut NotifyContext<'_>,
    origin: Ssid,
    queue: &NotifyQueue,
    server_notify: bool,
) -> Result<()> {
    if queue.is_empty() {
        return Ok(());
    }
    debug!(origin, objects = queue.len(), server_notify, "processing notify queue");
    let mut result = Ok(());
    keep_first(
        &mut result,
        ctx.hooks.sync_access_control(ctx.dm, origin, queue),
    );

    let mut instances_modified = false;
    for (oid, changes) in queue.iter() {
        instances_modified |= changes.instance_set.changed;
        if oid == oid::SECURITY {
            keep_first(&mut result, security_modified(ctx, changes));
        } else if server_notify && oid == oid::SERVER {
            keep_first(&mut result, server_modified(ctx, changes));
        }
    }
    if instances_modified && ctx.config.update_immediately_on_dm_change {
        keep_first(&mut result, ctx.servers.schedule_reload_servers());
    }

    let observe_origin = if ctx.config.enable_self_notify {
        SSID_BOOTSTRAP
    } else {
        origin
    };
    keep_first(&mut result, observe_notify(ctx, observe_origin, queue));
    keep_first(&mut result, ctx.hooks.attr_storage_notify(ctx.dm, queue));

    if let Err(err) = &result {
        warn!(%err, "notify processing failed");
    }
    result
}

fn security_modified(ctx: &mut NotifyContext<'_>, changes: &ObjectChanges) -> Result<()> {
    let mut result = Ok(());
    let mut last_iid: Option<Iid> = None;
    for &(iid, _) in &changes.resources {
        if last_iid != Some(iid) {
            keep_first(&mut result, ctx.servers.schedule_socket_update(iid));
            last_iid = Some(iid);
        }
    }
    // In immediate mode the caller reloads once for all objects
    if !ctx.config.update_immediately_on_dm_change && changes.instance_set.changed {
        keep_first(&mut result, ctx.servers.schedule_reload_servers());
    }
    result
}

fn meaningful_server_resource(config: &ClientConfig, rid: Rid) -> bool {
    match rid {
        server::BINDING | server::LIFETIME => true,
        server::PREFERRED_TRANSPORT => config.lwm2m11(),
        server::MUTE_SEND => config.lwm2m11() && config.send_enabled,
        _ => false,
    }
}

fn server_modified(ctx: &mut NotifyContext<'_>, changes: &ObjectChanges) -> Result<()> {
    let mut result = Ok(());
    if changes.instance_set.changed {
        if !ctx.config.update_immediately_on_dm_change {
            keep_first(&mut result, ctx.servers.schedule_reload_servers());
        }
        if ctx.config.send_enabled {
            // Removed servers must drop their deferred Send requests too
            keep_first(&mut result, ctx.servers.send_retry_deferred(None));
        }
        return result;
    }

    for &(iid, rid) in &changes.resources {
        if !meaningful_server_resource(ctx.config, rid) {
            continue;
        }
        let path = UriPath::resource(oid::SERVER, iid, server::SSID);
        let ssid = match ctx.dm.read_resource_i64(&path).map(valid_ssid) {
            Ok(Some(ssid)) => ssid,
            Ok(None) | Err(_) => {
                warn!(%path, "cannot resolve SSID of changed Server instance");
                let err = Error::bad_request(format!("no valid SSID at {}", path));
                keep_first(&mut result, Err(err));
                continue;
            }
        };
        if rid == server::MUTE_SEND {
            keep_first(&mut result, ctx.servers.send_retry_deferred(Some(ssid)));
        } else if ctx.servers.find_active(ssid).is_some() {
            debug!(ssid, rid, "server parameters changed, updating registration");
            keep_first(&mut result, ctx.servers.schedule_registration_update(ssid));
        }
    }
    result
}

fn observe_notify(ctx: &mut NotifyContext<'_>, origin: Ssid, queue: &NotifyQueue) -> Result<()> {
    let mut result = Ok(());
    for (oid, changes) in queue.iter() {
        if changes.instance_set.changed {
            let path = UriPath::object(oid);
            keep_first(&mut result, ctx.observer.notify(&path, origin, true));
        } else {
            for &(iid, rid) in &changes.resources {
                let path = UriPath::resource(oid, iid, rid);
                keep_first(&mut result, ctx.observer.notify(&path, origin, true));
            }
        }
    }
    result
}
